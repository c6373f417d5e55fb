/// Whether the receiver is allowed to substitute the payment output or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSubstitution {
    #[default]
    Enabled,
    Disabled,
}

impl OutputSubstitution {
    /// `disableoutputsubstitution` as the sender configured it. Unset allows substitution.
    pub(crate) fn from_disabled_flag(disabled: Option<bool>) -> Self {
        match disabled {
            Some(true) => Self::Disabled,
            Some(false) | None => Self::Enabled,
        }
    }

    pub(crate) fn is_enabled(self) -> bool { self == Self::Enabled }
}

#[cfg(test)]
mod test {
    use super::OutputSubstitution;

    #[test]
    fn unset_flag_allows_substitution() {
        assert_eq!(OutputSubstitution::from_disabled_flag(None), OutputSubstitution::Enabled);
        assert_eq!(OutputSubstitution::from_disabled_flag(Some(false)), OutputSubstitution::Enabled);
        assert_eq!(OutputSubstitution::from_disabled_flag(Some(true)), OutputSubstitution::Disabled);
    }
}
