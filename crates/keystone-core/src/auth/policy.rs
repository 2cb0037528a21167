//! Password policy
//!
//! Every rule is evaluated independently so a rejection lists all of the
//! rules a candidate breaks, not just the first one. Evaluation is pure.

use serde::{Deserialize, Serialize};

pub const MIN_LENGTH: usize = 8;
pub const MAX_LENGTH: usize = 128;

/// Characters that satisfy the "special character" rule
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()-_=+[]{};:'\",.<>/?\\|`~";

/// Exact-match deny-list of common weak passwords
pub const COMMON_WEAK_PASSWORDS: &[&str] = &[
    "password",
    "Password",
    "Password1",
    "Password123",
    "Password123!",
    "12345678",
    "123456789",
    "1234567890",
    "qwerty123",
    "Qwerty123",
    "admin123",
    "Admin123",
    "welcome123",
    "Welcome123",
    "letmein123",
];

/// Longest allowed run of one repeated character
const MAX_REPEATS: usize = 2;

/// A single broken rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolation {
    TooShort,
    TooLong,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecialCharacter,
    CommonPassword,
    SequentialCharacters,
    RepeatedCharacters,
}

impl PolicyViolation {
    pub fn message(&self) -> String {
        match self {
            Self::TooShort => format!("Password must be at least {MIN_LENGTH} characters long"),
            Self::TooLong => format!("Password must not exceed {MAX_LENGTH} characters"),
            Self::MissingUppercase => {
                "Password must contain at least one uppercase letter".to_string()
            }
            Self::MissingLowercase => {
                "Password must contain at least one lowercase letter".to_string()
            }
            Self::MissingDigit => "Password must contain at least one number".to_string(),
            Self::MissingSpecialCharacter => {
                "Password must contain at least one special character".to_string()
            }
            Self::CommonPassword => {
                "Password is too common. Please choose a more secure password".to_string()
            }
            Self::SequentialCharacters => {
                "Password should not contain sequential characters".to_string()
            }
            Self::RepeatedCharacters => {
                "Password should not contain excessive repeated characters".to_string()
            }
        }
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Outcome of classifying a candidate password
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    Accepted,
    Rejected(Vec<PolicyViolation>),
}

impl PolicyVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PolicyVerdict::Accepted)
    }

    pub fn violations(&self) -> &[PolicyViolation] {
        match self {
            PolicyVerdict::Accepted => &[],
            PolicyVerdict::Rejected(v) => v,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations().iter().map(|v| v.message()).collect()
    }
}

/// Classify `password` against every rule
pub fn evaluate(password: &str) -> PolicyVerdict {
    let chars: Vec<char> = password.chars().collect();
    let mut violations = Vec::new();

    if chars.len() < MIN_LENGTH {
        violations.push(PolicyViolation::TooShort);
    }
    if chars.len() > MAX_LENGTH {
        violations.push(PolicyViolation::TooLong);
    }
    if !chars.iter().any(|c| c.is_ascii_uppercase()) {
        violations.push(PolicyViolation::MissingUppercase);
    }
    if !chars.iter().any(|c| c.is_ascii_lowercase()) {
        violations.push(PolicyViolation::MissingLowercase);
    }
    if !chars.iter().any(|c| c.is_ascii_digit()) {
        violations.push(PolicyViolation::MissingDigit);
    }
    if !chars.iter().any(|c| SPECIAL_CHARACTERS.contains(*c)) {
        violations.push(PolicyViolation::MissingSpecialCharacter);
    }
    if COMMON_WEAK_PASSWORDS.contains(&password) {
        violations.push(PolicyViolation::CommonPassword);
    }
    if has_sequential_run(&chars) {
        violations.push(PolicyViolation::SequentialCharacters);
    }
    if has_excessive_repeats(&chars) {
        violations.push(PolicyViolation::RepeatedCharacters);
    }

    if violations.is_empty() {
        PolicyVerdict::Accepted
    } else {
        PolicyVerdict::Rejected(violations)
    }
}

/// Three consecutive code points ascending or descending by one ("abc", "321")
fn has_sequential_run(chars: &[char]) -> bool {
    chars.windows(3).any(|w| {
        let (a, b, c) = (w[0] as i64, w[1] as i64, w[2] as i64);
        (b == a + 1 && c == b + 1) || (b == a - 1 && c == b - 1)
    })
}

fn has_excessive_repeats(chars: &[char]) -> bool {
    let mut run = 1;
    for pair in chars.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            if run > MAX_REPEATS {
                return true;
            }
        } else {
            run = 1;
        }
    }
    false
}
