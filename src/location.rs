use crate::error::BackendError;

/// Column layout of a GeoLite City location row, in file order.
pub const LOCATION_COLUMNS: [&str; 9] = [
    "locId",
    "country",
    "region",
    "city",
    "postalCode",
    "latitude",
    "longitude",
    "metroCode",
    "areaCode",
];

/// One row of the location dataset, typed for insertion.
///
/// String lengths are not checked here; the store enforces its own bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub location_id: i32,
    pub country: String,
    pub region: String,
    pub city: String,
    pub postal_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub metro_code: i32,
    pub area_code: i32,
}

impl LocationRecord {
    /// Convert decoded fields into a record.
    ///
    /// Missing metro and area codes default to 0 and empty coordinates become NULL.
    /// A row with the wrong number of fields or an unparseable number is rejected.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, BackendError> {
        if fields.len() != LOCATION_COLUMNS.len() {
            return Err(BackendError::new(
                Some("ColumnCount".to_string()),
                format!(
                    "expected {} fields, found {}",
                    LOCATION_COLUMNS.len(),
                    fields.len()
                ),
            ));
        }
        let field = |idx: usize| fields[idx].as_ref();

        Ok(Self {
            location_id: parse_int(LOCATION_COLUMNS[0], field(0))?,
            country: field(1).to_string(),
            region: field(2).to_string(),
            city: field(3).to_string(),
            postal_code: field(4).to_string(),
            latitude: parse_decimal(LOCATION_COLUMNS[5], field(5))?,
            longitude: parse_decimal(LOCATION_COLUMNS[6], field(6))?,
            metro_code: parse_int_or_zero(LOCATION_COLUMNS[7], field(7))?,
            area_code: parse_int_or_zero(LOCATION_COLUMNS[8], field(8))?,
        })
    }
}

fn parse_int(name: &str, value: &str) -> Result<i32, BackendError> {
    lexical_core::parse::<i32>(value.trim().as_bytes())
        .map_err(|e| BackendError::malformed_value(name, format!("{value:?} ({e})")))
}

fn parse_int_or_zero(name: &str, value: &str) -> Result<i32, BackendError> {
    if value.trim().is_empty() {
        Ok(0)
    } else {
        parse_int(name, value)
    }
}

fn parse_decimal(name: &str, value: &str) -> Result<Option<f64>, BackendError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    lexical_core::parse::<f64>(trimmed.as_bytes())
        .map(Some)
        .map_err(|e| BackendError::malformed_value(name, format!("{value:?} ({e})")))
}
