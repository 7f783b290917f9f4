//! User interface values of pairing
//!
//! The values within this module cross the boundary between a Security Manager and whatever user
//! interface the application has. They only carry the six digit values, displaying them and
//! collecting the user's response is up to the application.

/// The six digit value of number comparison
///
/// Both devices display this value and the user confirms that the two displays match. The
/// `Display` implementation pads the value to the six digits that must be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareValue(pub(crate) u32);

impl CompareValue {
    /// Get the value to display
    pub fn get_value(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for CompareValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// A passkey to be displayed to the user
///
/// The user inputs this six digit value on the peer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasskeyOutput(pub(crate) u32);

impl PasskeyOutput {
    /// Get the passkey to display
    pub fn get_passkey(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for PasskeyOutput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_digits_are_displayed() {
        extern crate alloc;

        assert_eq!("000049", alloc::format!("{}", CompareValue(49)));
        assert_eq!("123456", alloc::format!("{}", PasskeyOutput(123456)));
    }
}
