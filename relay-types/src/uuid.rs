//! UUID helper used by authoring tools to name graphs and nodes.

use core::fmt;
use core::str::FromStr;

/// A 16-byte UUID with a canonical `{8-4-4-4-12}` lowercase hex form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Uuid {
    bytes: [u8; 16],
}

/// Parse failure for [`Uuid::from_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidError {
    /// A character outside `[0-9a-fA-F-]` was found.
    InvalidCharacter,
    /// Too few or too many hex digits, or a mismatched brace.
    InvalidLength,
}

impl fmt::Display for UuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCharacter => write!(f, "invalid character in uuid"),
            Self::InvalidLength => write!(f, "malformed uuid"),
        }
    }
}

impl std::error::Error for UuidError {}

impl Uuid {
    /// Number of bytes in a UUID.
    pub const LENGTH: usize = 16;

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// The raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Whether all bytes are zero, the value parse failures collapse to.
    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|byte| *byte == 0)
    }

    /// A freshly generated random UUID.
    #[cfg(feature = "random")]
    pub fn random() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, byte) in self.bytes.iter().enumerate() {
            if matches!(index, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        write!(f, "}}")
    }
}

impl FromStr for Uuid {
    type Err = UuidError;

    /// Accepts the canonical braced form, the unbraced form, and uppercase
    /// hex digits. Dashes may appear anywhere between digit pairs.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input
            .strip_prefix('{')
            .map_or(Ok(input), |rest| {
                rest.strip_suffix('}').ok_or(UuidError::InvalidLength)
            })?;

        let mut bytes = [0u8; 16];
        let mut nibble = 0usize;
        for ch in input.chars() {
            if ch == '-' {
                continue;
            }
            let digit = ch.to_digit(16).ok_or(UuidError::InvalidCharacter)? as u8;
            if nibble >= Self::LENGTH * 2 {
                return Err(UuidError::InvalidLength);
            }
            if nibble % 2 == 0 {
                bytes[nibble / 2] = digit << 4;
            } else {
                bytes[nibble / 2] |= digit;
            }
            nibble += 1;
        }

        if nibble != Self::LENGTH * 2 {
            return Err(UuidError::InvalidLength);
        }

        Ok(Self { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn canonical_form_round_trips() {
        let text = "{00112233-4455-6677-8899-aabbccddeeff}";
        let uuid: Uuid = text.parse().unwrap();
        assert_eq!(uuid.to_string(), text);
    }

    #[test]
    fn unbraced_and_uppercase_accepted() {
        let braced: Uuid = "{00112233-4455-6677-8899-aabbccddeeff}".parse().unwrap();
        let bare: Uuid = "00112233-4455-6677-8899-AABBCCDDEEFF".parse().unwrap();
        assert_eq!(braced, bare);
    }

    #[test]
    fn malformed_inputs_rejected() {
        assert!("{00112233-4455-6677-8899-aabbccddeeff".parse::<Uuid>().is_err());
        assert!("0011".parse::<Uuid>().is_err());
        assert!("{00112233-4455-6677-8899-aabbccddeefg}".parse::<Uuid>().is_err());
        assert!("00112233-4455-6677-8899-aabbccddeeff00".parse::<Uuid>().is_err());
    }

    #[quickcheck]
    fn display_parse_round_trips(seed: u64) -> bool {
        // Derive deterministic bytes from the seed so the property holds for
        // arbitrary byte patterns without a rand dependency here.
        let mut bytes = [0u8; 16];
        let mut state = seed;
        for byte in bytes.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            *byte = (state >> 56) as u8;
        }
        let uuid = Uuid::from_bytes(bytes);
        uuid.to_string().parse::<Uuid>() == Ok(uuid)
    }
}
