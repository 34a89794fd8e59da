use std::fmt::Display;

/// Unwrap a value whose absence breaks an engine invariant, naming the broken invariant.
pub trait ExpectMsg<T> {
    fn expect_msg(self, msg: &str) -> T;
}

impl<T, E: Display> ExpectMsg<T> for Result<T, E> {
    #[track_caller]
    fn expect_msg(self, msg: &str) -> T {
        self.unwrap_or_else(|err| panic!("{}: {}", msg, err))
    }
}

impl<T> ExpectMsg<T> for Option<T> {
    #[track_caller]
    fn expect_msg(self, msg: &str) -> T {
        self.unwrap_or_else(|| panic!("{}", msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::SnnError;

    #[test]
    #[should_panic(expected = "invalid graph: Inference Graph error: cycle")]
    fn panic_carries_the_error_text() {
        let result: Result<(), SnnError> = Err(SnnError::Graph("cycle".to_string()));
        result.expect_msg("invalid graph");
    }

    #[test]
    fn values_pass_through() {
        assert_eq!(Some(3).expect_msg("missing"), 3);
    }
}
