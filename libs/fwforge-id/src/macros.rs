//! Macro for defining typed fingerprint newtypes.

/// Defines a newtype wrapping a truncated hex digest.
///
/// Unlike a typed ID wrapping a freshly generated ULID, a fingerprint is
/// never generated on its own — it is always derived from hashing some
/// input, so this macro exposes `from_hex` (validating length) instead
/// of a `new()` constructor.
///
/// # Example
///
/// ```ignore
/// define_fingerprint!(RequestHash, 15);
///
/// let hash = RequestHash::from_hex("a1b2c3d4e5f60708")?;
/// ```
#[macro_export]
macro_rules! define_fingerprint {
    ($name:ident, $len:expr) => {
        /// A content fingerprint truncated to a fixed number of hex characters.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Number of hex characters this fingerprint carries.
            pub const LEN: usize = $len;

            /// Validate and wrap an already-truncated hex string.
            pub fn from_hex(s: impl Into<String>) -> Result<Self, $crate::FingerprintError> {
                let s = s.into();
                if s.is_empty() {
                    return Err($crate::FingerprintError::Empty);
                }
                if s.len() != Self::LEN {
                    return Err($crate::FingerprintError::WrongLength {
                        expected: Self::LEN,
                        actual: s.len(),
                    });
                }
                if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err($crate::FingerprintError::NotHex(s));
                }
                Ok(Self(s))
            }

            /// Derive a fingerprint by SHA-256 hashing `input` and truncating
            /// the hex digest to `LEN` characters.
            #[must_use]
            pub fn from_digest_input(input: impl AsRef<[u8]>) -> Self {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(input.as_ref());
                let full = format!("{:x}", hasher.finalize());
                Self(full[..Self::LEN].to_string())
            }

            /// Borrow the underlying hex string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The first `n` characters of the fingerprint, used where the
            /// spec calls for a shortened form (e.g. appended to a build
            /// artifact name).
            #[must_use]
            pub fn short(&self, n: usize) -> &str {
                &self.0[..n.min(self.0.len())]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::FingerprintError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}
