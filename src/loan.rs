//! The loan record and the parameters a caller hands to a transition.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{CirculationError, Result},
    state::LoanState,
};

/// Open, ordered map of caller-supplied values
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Raw value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Value for `key` if it is a string
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }
}

/// A patron borrowing or reserving an item
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Loan {
    /// Unique loan identifier, never changed after creation
    pub loan_pid: String,
    /// Current lifecycle state
    pub state: LoanState,
    /// Borrowed item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_pid: Option<String>,
    /// Document the item belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_pid: Option<String>,
    /// Borrower
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patron_pid: Option<String>,
    /// Where the patron collects the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_location_pid: Option<String>,
    /// Where the last action took place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_location_pid: Option<String>,
    /// Who performed the last action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_user_pid: Option<String>,
    /// When the last action took place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<NaiveDate>,
    /// First day of the loan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Due date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Date after which a request lapses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_expire_date: Option<NaiveDate>,
    /// How many times the loan was extended
    #[serde(default)]
    pub extension_count: u32,
    /// Any other attribute attached to the loan
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Loan {
    /// Names of every typed field a param may write
    pub const FIELDS: [&'static str; 11] = [
        "item_pid",
        "document_pid",
        "patron_pid",
        "pickup_location_pid",
        "transaction_location_pid",
        "transaction_user_pid",
        "transaction_date",
        "start_date",
        "end_date",
        "request_expire_date",
        "extension_count",
    ];

    /// Fields that no param may touch
    pub const RESERVED: [&'static str; 2] = ["loan_pid", "state"];

    /// Create a bare loan in the given state
    #[must_use]
    pub fn new(loan_pid: impl Into<String>, state: LoanState) -> Self {
        Self {
            loan_pid: loan_pid.into(),
            state,
            item_pid: None,
            document_pid: None,
            patron_pid: None,
            pickup_location_pid: None,
            transaction_location_pid: None,
            transaction_user_pid: None,
            transaction_date: None,
            start_date: None,
            end_date: None,
            request_expire_date: None,
            extension_count: 0,
            extra: BTreeMap::new(),
        }
    }

    /// Whether `key` names a typed or reserved field
    #[must_use]
    pub fn is_field(key: &str) -> bool {
        Self::FIELDS.contains(&key) || Self::RESERVED.contains(&key)
    }

    /// Date the loan's date arithmetic is anchored on
    #[must_use]
    pub fn reference_date(&self) -> NaiveDate {
        self.transaction_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Write a single param into the loan
    ///
    /// # Errors
    ///
    /// Returns `CirculationError::InvalidParam` if the key is reserved or the
    /// value does not fit the field.
    pub fn merge_param(&mut self, key: &str, value: &Value) -> Result<()> {
        match key {
            "loan_pid" | "state" => {
                return Err(invalid(key, "field cannot be changed through params"));
            }
            "item_pid" => self.item_pid = text(key, value)?,
            "document_pid" => self.document_pid = text(key, value)?,
            "patron_pid" => self.patron_pid = text(key, value)?,
            "pickup_location_pid" => self.pickup_location_pid = text(key, value)?,
            "transaction_location_pid" => self.transaction_location_pid = text(key, value)?,
            "transaction_user_pid" => self.transaction_user_pid = text(key, value)?,
            "transaction_date" => self.transaction_date = date(key, value)?,
            "start_date" => self.start_date = date(key, value)?,
            "end_date" => self.end_date = date(key, value)?,
            "request_expire_date" => self.request_expire_date = date(key, value)?,
            "extension_count" => self.extension_count = count(key, value)?,
            _ => {
                self.extra.insert(key.to_string(), value.clone());
            }
        }
        Ok(())
    }

    /// Copy of this loan with every param merged in, except `skip`
    ///
    /// # Errors
    ///
    /// Returns the first `CirculationError::InvalidParam` met; `self` is never
    /// modified.
    pub fn merged(&self, params: &Params, skip: &str) -> Result<Self> {
        let mut staged = self.clone();
        for (key, value) in params.iter().filter(|(key, _)| *key != skip) {
            staged.merge_param(key, value)?;
        }
        Ok(staged)
    }
}

/// Build an `InvalidParam` error
fn invalid(key: &str, reason: &str) -> CirculationError {
    CirculationError::InvalidParam { key: key.to_string(), reason: reason.to_string() }
}

/// Read an optional string field
fn text(key: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(invalid(key, "expected a string")),
    }
}

/// Read an optional `YYYY-MM-DD` date field
fn date(key: &str, value: &Value) -> Result<Option<NaiveDate>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => s
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|e| invalid(key, &format!("expected a YYYY-MM-DD date: {e}"))),
        _ => Err(invalid(key, "expected a date string")),
    }
}

/// Read a non-negative counter
fn count(key: &str, value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| invalid(key, "expected a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{Value, json};

    use super::{Loan, Params};
    use crate::{error::CirculationError, state::LoanState};

    #[test]
    fn test_merge_skips_trigger_and_types_known_fields() {
        let loan = Loan::new("loan-1", LoanState::Created);
        let params = Params::new()
            .with("trigger", "request")
            .with("pickup_location_pid", "L1")
            .with("start_date", "2024-03-01")
            .with("extension_count", 2)
            .with("note", "fragile");

        let staged = loan.merged(&params, "trigger").unwrap_or_else(|_| loan.clone());

        assert_eq!(staged.pickup_location_pid.as_deref(), Some("L1"));
        assert_eq!(staged.start_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(staged.extension_count, 2);
        assert_eq!(staged.extra.get("note"), Some(&Value::from("fragile")));
        assert!(!staged.extra.contains_key("trigger"));
        assert_eq!(loan.pickup_location_pid, None);
    }

    #[test]
    fn test_reserved_and_badly_typed_params_are_rejected() {
        let loan = Loan::new("loan-1", LoanState::Created);

        let state = Params::new().with("state", "CANCELLED");
        assert!(matches!(
            loan.merged(&state, "trigger"),
            Err(CirculationError::InvalidParam { ref key, .. }) if key == "state"
        ));

        let bad_date = Params::new().with("end_date", "next tuesday");
        assert!(loan.merged(&bad_date, "trigger").is_err());

        let bad_pid = Params::new().with("item_pid", 42);
        assert!(loan.merged(&bad_pid, "trigger").is_err());
    }

    #[test]
    fn test_null_clears_optional_field() {
        let mut loan = Loan::new("loan-1", LoanState::Pending);
        loan.pickup_location_pid = Some("L1".to_string());

        let staged = loan
            .merged(&Params::new().with("pickup_location_pid", Value::Null), "trigger")
            .unwrap_or_else(|_| loan.clone());

        assert_eq!(staged.pickup_location_pid, None);
    }

    #[test]
    fn test_loan_json_flattens_extra_fields() {
        let mut loan = Loan::new("loan-7", LoanState::ItemOnLoan);
        loan.item_pid = Some("item-1".to_string());
        loan.extra.insert("shelf".to_string(), json!("B2"));

        let value = serde_json::to_value(&loan).unwrap_or(Value::Null);
        assert_eq!(value["state"], json!("ITEM_ON_LOAN"));
        assert_eq!(value["shelf"], json!("B2"));

        let back: Option<Loan> = serde_json::from_value(value).ok();
        assert_eq!(back, Some(loan));
    }
}
