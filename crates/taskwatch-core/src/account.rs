use std::fmt;

/// Account login used to obtain a fresh session from scratch.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let account = AccountCredentials {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{account:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }
}
