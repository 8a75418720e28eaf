use crate::Error;
use std::borrow::Cow;

pub use hex_buffer_serde::{Hex, HexForm};

// a single-purpose type for use in `#[serde(with)]`
pub enum Bytes32Hex {}

impl Hex<[u8; 32]> for Bytes32Hex {
    type Error = Error;

    fn create_bytes(value: &[u8; 32]) -> Cow<'_, [u8]> {
        Cow::Borrowed(&value[..])
    }

    fn from_bytes(bytes: &[u8]) -> Result<[u8; 32], Error> {
        if bytes.len() != 32 {
            return Err(Error::BadLength("32-byte value"));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

/// Implements hex `Display`/`FromStr` and dual-representation serde
/// (hex string for human-readable formats, raw bytes otherwise) for a
/// fixed-size byte newtype.
#[macro_export]
macro_rules! impl_hex_bytes {
    ($name:ident, $len:expr, $expecting:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub fn from_bytes(bytes: &[u8]) -> Result<Self, $crate::Error> {
                if bytes.len() != $len {
                    return Err($crate::Error::BadLength($expecting));
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Ok(Self(out))
            }

            pub fn from_hex(input: &str) -> Result<Self, $crate::Error> {
                let bytes = hex::decode($crate::util::trim_hex(input))?;
                Self::from_bytes(&bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    serializer.serialize_bytes(&self.0)
                }
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                struct BytesVisitor;

                impl<'de> ::serde::de::Visitor<'de> for BytesVisitor {
                    type Value = $name;

                    fn expecting(
                        &self,
                        formatter: &mut ::core::fmt::Formatter,
                    ) -> ::core::fmt::Result {
                        formatter.write_str($expecting)
                    }

                    fn visit_str<E>(self, input: &str) -> Result<$name, E>
                    where
                        E: ::serde::de::Error,
                    {
                        $name::from_hex(input).map_err(E::custom)
                    }

                    fn visit_bytes<E>(self, bytes: &[u8]) -> Result<$name, E>
                    where
                        E: ::serde::de::Error,
                    {
                        $name::from_bytes(bytes).map_err(E::custom)
                    }
                }

                if deserializer.is_human_readable() {
                    deserializer.deserialize_str(BytesVisitor)
                } else {
                    deserializer.deserialize_bytes(BytesVisitor)
                }
            }
        }
    };
}
