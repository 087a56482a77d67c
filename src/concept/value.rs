use chrono::{DateTime, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

use crate::error::{DriverError, Result};
use crate::protocol::ValueRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Value type of the root attribute type
    Object,
    Boolean,
    Long,
    Double,
    String,
    DateTime,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Object => "object",
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::DateTime => "datetime",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueType {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "object" => Ok(ValueType::Object),
            "boolean" => Ok(ValueType::Boolean),
            "long" => Ok(ValueType::Long),
            "double" => Ok(ValueType::Double),
            "string" => Ok(ValueType::String),
            "datetime" => Ok(ValueType::DateTime),
            other => Err(DriverError::UnexpectedNativeValue(format!(
                "unknown value type '{}'",
                other
            ))),
        }
    }
}

/// A literal or computed value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Value::Long(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_datetime(&self) -> bool {
        matches!(self, Value::DateTime(_))
    }

    pub fn as_boolean(&self) -> Result<bool> {
        match self {
            Value::Boolean(value) => Ok(*value),
            _ => Err(self.cast_error(ValueType::Boolean)),
        }
    }

    pub fn as_long(&self) -> Result<i64> {
        match self {
            Value::Long(value) => Ok(*value),
            _ => Err(self.cast_error(ValueType::Long)),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            Value::Double(value) => Ok(*value),
            _ => Err(self.cast_error(ValueType::Double)),
        }
    }

    pub fn as_string(&self) -> Result<&str> {
        match self {
            Value::String(value) => Ok(value),
            _ => Err(self.cast_error(ValueType::String)),
        }
    }

    pub fn as_datetime(&self) -> Result<NaiveDateTime> {
        match self {
            Value::DateTime(value) => Ok(*value),
            _ => Err(self.cast_error(ValueType::DateTime)),
        }
    }

    fn cast_error(&self, to: ValueType) -> DriverError {
        DriverError::InvalidValueCast {
            from: self.value_type(),
            to,
        }
    }

    pub(crate) fn from_record(record: ValueRecord) -> Result<Self> {
        Ok(match record {
            ValueRecord::Boolean(value) => Value::Boolean(value),
            ValueRecord::Long(value) => Value::Long(value),
            ValueRecord::Double(value) => Value::Double(value),
            ValueRecord::String(value) => Value::String(value),
            ValueRecord::DateTime(millis) => DateTime::from_timestamp_millis(millis)
                .map(|datetime| Value::DateTime(datetime.naive_utc()))
                .ok_or_else(|| {
                    DriverError::UnexpectedNativeValue(format!(
                        "datetime out of range: {}",
                        millis
                    ))
                })?,
        })
    }

    pub(crate) fn to_record(&self) -> ValueRecord {
        match self {
            Value::Boolean(value) => ValueRecord::Boolean(*value),
            Value::Long(value) => ValueRecord::Long(*value),
            Value::Double(value) => ValueRecord::Double(*value),
            Value::String(value) => ValueRecord::String(value.clone()),
            Value::DateTime(value) => ValueRecord::DateTime(value.and_utc().timestamp_millis()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(value) => write!(f, "{}", value),
            Value::Long(value) => write!(f, "{}", value),
            Value::Double(value) => write!(f, "{}", value),
            Value::String(value) => write!(f, "{}", value),
            Value::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%dT%H:%M:%S%.3f")),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_accessors_reject_wrong_type() {
        let value = Value::from("Alice");
        assert_eq!(value.as_string().unwrap(), "Alice");

        let err = value.as_long().unwrap_err();
        assert_eq!(
            err,
            DriverError::InvalidValueCast {
                from: ValueType::String,
                to: ValueType::Long,
            }
        );
    }

    #[test]
    fn test_datetime_keeps_millisecond_precision() {
        let datetime = NaiveDate::from_ymd_opt(2023, 4, 5)
            .unwrap()
            .and_hms_milli_opt(6, 7, 8, 9)
            .unwrap();
        let value = Value::from(datetime);

        let restored = Value::from_record(value.to_record()).unwrap();
        assert_eq!(restored.as_datetime().unwrap(), datetime);
        assert_eq!(restored.to_string(), "2023-04-05T06:07:08.009");
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!("datetime".parse::<ValueType>().unwrap(), ValueType::DateTime);
        assert!("decimal".parse::<ValueType>().is_err());
    }
}
