use std::sync::Arc;

/// Account attributes a password must not resemble.
#[derive(Debug, Default, Clone)]
pub struct PasswordContext<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

/// A single password strength rule. Returns a user-facing message when the
/// password is rejected.
pub trait PasswordRule: Send + Sync {
    fn check(&self, password: &str, context: &PasswordContext<'_>) -> Option<String>;
}

pub struct MinimumLength(pub usize);

impl PasswordRule for MinimumLength {
    fn check(&self, password: &str, _context: &PasswordContext<'_>) -> Option<String> {
        (password.chars().count() < self.0).then(|| {
            format!(
                "This password is too short. It must contain at least {} characters.",
                self.0
            )
        })
    }
}

pub struct NotEntirelyNumeric;

impl PasswordRule for NotEntirelyNumeric {
    fn check(&self, password: &str, _context: &PasswordContext<'_>) -> Option<String> {
        (!password.is_empty() && password.chars().all(|c| c.is_ascii_digit()))
            .then(|| "This password is entirely numeric.".to_string())
    }
}

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "12345678", "123456789", "1234567890", "password", "password1", "password123",
    "qwerty", "qwerty123", "abc123", "111111", "letmein", "welcome", "monkey", "dragon",
    "iloveyou", "admin", "admin123", "changeme", "passw0rd", "football", "baseball",
    "sunshine", "princess", "trustno1", "superman", "master", "whatever", "starwars",
];

pub struct NotCommon;

impl PasswordRule for NotCommon {
    fn check(&self, password: &str, _context: &PasswordContext<'_>) -> Option<String> {
        let lowered = password.to_lowercase();
        COMMON_PASSWORDS
            .contains(&lowered.as_str())
            .then(|| "This password is too common.".to_string())
    }
}

/// Rejects passwords that contain, or are contained in, an account
/// attribute of at least three characters (case-insensitive).
pub struct NotSimilarToAttributes;

impl PasswordRule for NotSimilarToAttributes {
    fn check(&self, password: &str, context: &PasswordContext<'_>) -> Option<String> {
        let password = password.to_lowercase();
        let email_local = context.email.split('@').next().unwrap_or_default();

        let attributes = [
            ("username", context.username),
            ("email address", email_local),
            ("first name", context.first_name),
            ("last name", context.last_name),
        ];

        attributes.iter().find_map(|(label, value)| {
            let value = value.trim().to_lowercase();
            if value.chars().count() < 3 {
                return None;
            }
            (password.contains(&value) || value.contains(&password))
                .then(|| format!("The password is too similar to the {}.", label))
        })
    }
}

/// Ordered set of rules; every violated rule is reported.
#[derive(Clone)]
pub struct PasswordPolicy {
    rules: Vec<Arc<dyn PasswordRule>>,
}

impl PasswordPolicy {
    pub fn new(rules: Vec<Arc<dyn PasswordRule>>) -> Self {
        Self { rules }
    }

    pub fn standard(min_length: usize) -> Self {
        Self::new(vec![
            Arc::new(NotSimilarToAttributes),
            Arc::new(MinimumLength(min_length)),
            Arc::new(NotCommon),
            Arc::new(NotEntirelyNumeric),
        ])
    }

    pub fn validate(&self, password: &str, context: &PasswordContext<'_>) -> Result<(), Vec<String>> {
        let violations: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| rule.check(password, context))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> PasswordContext<'static> {
        PasswordContext {
            username: "alice",
            email: "a@x.com",
            first_name: "Alice",
            last_name: "Liddell",
        }
    }

    #[test]
    fn accepts_reasonable_passwords() {
        let policy = PasswordPolicy::standard(8);
        assert!(policy.validate("Secret123!", &alice()).is_ok());
        assert!(policy.validate("NewPass1!", &alice()).is_ok());
    }

    #[test]
    fn reports_every_violation() {
        let policy = PasswordPolicy::standard(8);
        let errors = policy.validate("123456", &alice()).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("too short")));
        assert!(errors.iter().any(|e| e.contains("too common")));
        assert!(errors.iter().any(|e| e.contains("entirely numeric")));
    }

    #[test]
    fn rejects_passwords_resembling_the_account() {
        let policy = PasswordPolicy::standard(8);
        let errors = policy.validate("Alice2024", &alice()).unwrap_err();
        assert_eq!(errors, vec!["The password is too similar to the username."]);

        let errors = policy.validate("liddell!!", &alice()).unwrap_err();
        assert_eq!(errors, vec!["The password is too similar to the last name."]);
    }

    #[test]
    fn short_attributes_are_ignored() {
        let context = PasswordContext {
            username: "al",
            ..alice()
        };
        assert!(NotSimilarToAttributes.check("al-the-great", &context).is_none());
    }

    #[test]
    fn custom_rule_sets() {
        struct NoSpaces;
        impl PasswordRule for NoSpaces {
            fn check(&self, password: &str, _: &PasswordContext<'_>) -> Option<String> {
                password.contains(' ').then(|| "No spaces.".to_string())
            }
        }

        let policy = PasswordPolicy::new(vec![Arc::new(NoSpaces)]);
        assert!(policy.validate("123", &PasswordContext::default()).is_ok());
        assert_eq!(
            policy.validate("a b", &PasswordContext::default()),
            Err(vec!["No spaces.".to_string()])
        );
    }
}
