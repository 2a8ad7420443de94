//! Group arithmetic for the threshold protocols.
//!
//! All protocols work in the Ristretto group. Secret sharing uses polynomials
//! over the scalar field evaluated at 1-based participant indices; index 0 is
//! the shared secret and is never handed out.

use curve25519_dalek::{
	ristretto::{CompressedRistretto, RistrettoPoint},
	scalar::Scalar,
	traits::Identity,
};
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256, Sha3_512};

/// Hashes length-prefixed `parts` under `domain` to a uniformly distributed scalar.
pub fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Scalar {
	let mut hasher = Sha3_512::new();
	hasher.update(domain);
	for part in parts {
		hasher.update((part.len() as u64).to_be_bytes());
		hasher.update(part);
	}
	let mut wide = [0u8; 64];
	wide.copy_from_slice(&hasher.finalize());
	Scalar::from_bytes_mod_order_wide(&wide)
}

pub fn random_scalar() -> Scalar {
	Scalar::random(&mut OsRng)
}

pub fn decode_point(bytes: &[u8]) -> Option<RistrettoPoint> {
	let arr: [u8; 32] = bytes.try_into().ok()?;
	CompressedRistretto(arr).decompress()
}

pub fn decode_scalar(bytes: &[u8]) -> Option<Scalar> {
	let arr: [u8; 32] = bytes.try_into().ok()?;
	Option::from(Scalar::from_canonical_bytes(arr))
}

/// Secret polynomial `f(x) = a_0 + a_1 x + ... + a_{t-1} x^{t-1}`.
pub struct Polynomial {
	coefficients: Vec<Scalar>,
}

impl Polynomial {
	/// Random polynomial with `constant` as `f(0)` and `count` coefficients.
	pub fn random(constant: Scalar, count: usize) -> Self {
		let mut coefficients = Vec::with_capacity(count.max(1));
		coefficients.push(constant);
		for _ in 1..count {
			coefficients.push(random_scalar());
		}
		Self { coefficients }
	}

	pub fn evaluate(&self, x: u32) -> Scalar {
		let x = Scalar::from(x);
		self.coefficients
			.iter()
			.rev()
			.fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
	}

	/// Feldman commitments `a_k * G`.
	pub fn commitments(&self) -> Vec<RistrettoPoint> {
		self.coefficients
			.iter()
			.map(RistrettoPoint::mul_base)
			.collect()
	}
}

/// Evaluates committed polynomial `sum C_k x^k` in the exponent.
pub fn evaluate_commitments(commitments: &[RistrettoPoint], x: u32) -> RistrettoPoint {
	let x = Scalar::from(x);
	commitments
		.iter()
		.rev()
		.fold(RistrettoPoint::identity(), |acc, c| acc * x + c)
}

/// Keccak-256 over the compressed commitments, broadcast in the commit round.
pub fn commitment_hash(commitments: &[RistrettoPoint]) -> [u8; 32] {
	let mut hasher = Keccak256::new();
	for c in commitments {
		hasher.update(c.compress().as_bytes());
	}
	let mut out = [0u8; 32];
	out.copy_from_slice(&hasher.finalize());
	out
}

/// Lagrange coefficient of `index` for interpolation at zero over `indices`.
pub fn lagrange_at_zero(index: u32, indices: &[u32]) -> Scalar {
	let xi = Scalar::from(index);
	let mut numerator = Scalar::ONE;
	let mut denominator = Scalar::ONE;
	for &j in indices.iter().filter(|&&j| j != index) {
		let xj = Scalar::from(j);
		numerator *= xj;
		denominator *= xj - xi;
	}
	numerator * denominator.invert()
}

/// Schnorr signature `(R, z)` with `z*G = R + c*Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
	pub r: RistrettoPoint,
	pub z: Scalar,
}

impl Signature {
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(64);
		out.extend_from_slice(self.r.compress().as_bytes());
		out.extend_from_slice(self.z.as_bytes());
		out
	}

	pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
		if bytes.len() != 64 {
			return None;
		}
		Some(Self {
			r: decode_point(&bytes[..32])?,
			z: decode_scalar(&bytes[32..])?,
		})
	}
}

pub fn challenge(r: &RistrettoPoint, group_key: &RistrettoPoint, message_hash: &[u8; 32]) -> Scalar {
	hash_to_scalar(
		b"teleport/schnorr-challenge",
		&[
			r.compress().as_bytes(),
			group_key.compress().as_bytes(),
			message_hash,
		],
	)
}

pub fn verify(group_key: &RistrettoPoint, message_hash: &[u8; 32], signature: &Signature) -> bool {
	let c = challenge(&signature.r, group_key, message_hash);
	RistrettoPoint::mul_base(&signature.z) == signature.r + c * group_key
}
