//! Phone number normalization.
//!
//! Two canonical shapes exist for the same subscriber:
//!
//! | Form    | Example          | Used for                         |
//! |---------|------------------|----------------------------------|
//! | storage | `081234567890`   | persisted job recipients, UI     |
//! | send    | `6281234567890`  | every call to the transport      |
//!
//! A number is valid only when its send form is the country prefix followed
//! by `min..=max` subscriber digits.

use thiserror::Error;

use crate::config::PhoneConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("no digits in {0:?}")]
    NoDigits(String),

    #[error("{number} does not start with 0 or +{prefix}")]
    BadPrefix { number: String, prefix: String },

    #[error("{number} has {digits} subscriber digits, expected {min}..={max}")]
    BadLength {
        number: String,
        digits: usize,
        min: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneRules {
    prefix: String,
    min_digits: usize,
    max_digits: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self::new(&PhoneConfig::default())
    }
}

impl PhoneRules {
    pub fn new(cfg: &PhoneConfig) -> Self {
        Self {
            prefix: cfg.country_prefix.clone(),
            min_digits: cfg.min_subscriber_digits,
            max_digits: cfg.max_subscriber_digits,
        }
    }

    pub fn country_prefix(&self) -> &str {
        &self.prefix
    }

    /// Transport-addressable form: `62` + subscriber digits.
    pub fn to_send_form(&self, raw: &str) -> Result<String, PhoneError> {
        let subscriber = self.subscriber_digits(raw)?;
        Ok(format!("{}{}", self.prefix, subscriber))
    }

    /// Local form kept in the job store: `0` + subscriber digits.
    pub fn to_storage_form(&self, raw: &str) -> Result<String, PhoneError> {
        let subscriber = self.subscriber_digits(raw)?;
        Ok(format!("0{subscriber}"))
    }

    pub fn is_valid(&self, raw: &str) -> bool {
        self.subscriber_digits(raw).is_ok()
    }

    fn subscriber_digits(&self, raw: &str) -> Result<String, PhoneError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(PhoneError::NoDigits(raw.to_string()));
        }

        let subscriber = if let Some(rest) = digits.strip_prefix(self.prefix.as_str()) {
            rest
        } else if let Some(rest) = digits.strip_prefix('0') {
            rest
        } else {
            return Err(PhoneError::BadPrefix {
                number: digits.clone(),
                prefix: self.prefix.clone(),
            });
        };

        let len = subscriber.len();
        if len < self.min_digits || len > self.max_digits {
            return Err(PhoneError::BadLength {
                number: digits.clone(),
                digits: len,
                min: self.min_digits,
                max: self.max_digits,
            });
        }
        Ok(subscriber.to_string())
    }
}
