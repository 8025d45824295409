//! # Validation Module
//!
//! Input validation for the ledger's write operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Outer API (HTTP/CLI)                                         │
//! │  └── Shape of the payload (deserialization)                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - cheap checks before any transaction            │
//! │  ├── codes, names, quantities, prices, windows                          │
//! │  └── never touches storage                                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE (code, barcode, invoice_number)                            │
//! │  ├── CHECK (stock >= 0, selling_price > 0)                             │
//! │  └── append-only triggers on stock_movements                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::money::Money;
use crate::{MAX_ITEM_QUANTITY, MAX_MONEY_MINOR, MAX_SALE_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a product code.
///
/// ## Rules
/// - Must not be empty, at most 50 characters
/// - Letters, digits, hyphens, underscores only
///
/// ```rust
/// use kasir_core::validation::validate_code;
///
/// assert!(validate_code("MNM-0001").is_ok());
/// assert!(validate_code("").is_err());
/// assert!(validate_code("has space").is_err());
/// ```
pub fn validate_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: 50,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a barcode: digits only, 8 to 14 long (EAN-8 up to GTIN-14).
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
    let barcode = barcode.trim();

    if !(8..=14).contains(&barcode.len()) || !barcode.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must be 8 to 14 digits".to_string(),
        });
    }

    Ok(())
}

/// Validates a non-empty label of bounded length (name, unit, category...).
pub fn validate_label(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates a product name (1 to 200 characters).
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    validate_label("name", name, 200)
}

/// Normalizes optional free text: trims, maps blank to `None`, bounds length.
pub fn normalize_optional(field: &str, value: Option<&str>, max: usize) -> ValidationResult<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > max => Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        }),
        Some(v) => Ok(Some(v.to_string())),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity in base units.
///
/// ## Rules
/// - Must be positive
/// - Must not exceed [`MAX_ITEM_QUANTITY`]
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates an absolute stock level set by an operator.
pub fn validate_stock_level(stock: i64) -> ValidationResult<()> {
    if stock < 0 {
        return Err(ValidationError::OutOfRange {
            field: "stock".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a non-negative amount (costs, discounts, tax, payments).
///
/// ## Rules
/// - Must not be negative
/// - Must not exceed [`MAX_MONEY_MINOR`]
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() || amount.minor() > MAX_MONEY_MINOR {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_MONEY_MINOR,
        });
    }

    Ok(())
}

/// Validates a strictly positive amount (selling price, sale total), at
/// most [`MAX_MONEY_MINOR`].
pub fn validate_positive(field: &str, amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    if amount.minor() > MAX_MONEY_MINOR {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 1,
            max: MAX_MONEY_MINOR,
        });
    }

    Ok(())
}

/// `unit × quantity`, rejected when it would leave the accepted range.
///
/// ```rust
/// use kasir_core::money::Money;
/// use kasir_core::validation::validate_extended_amount;
///
/// assert_eq!(
///     validate_extended_amount("item total", Money::from_minor(1500), 3).unwrap(),
///     Money::from_minor(4500)
/// );
/// assert!(validate_extended_amount("item total", Money::from_minor(i64::MAX / 2), 3).is_err());
/// ```
pub fn validate_extended_amount(field: &str, unit: Money, quantity: i64) -> ValidationResult<Money> {
    unit.checked_multiply_quantity(quantity)
        .filter(|amount| !amount.is_negative() && amount.minor() <= MAX_MONEY_MINOR)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_MONEY_MINOR,
        })
}

/// Validates the alternate unit pair: both or neither, factor above 1.
pub fn validate_alt_unit(alt_unit: Option<&str>, factor: Option<i64>) -> ValidationResult<()> {
    match (alt_unit.map(str::trim).filter(|u| !u.is_empty()), factor) {
        (None, None) => Ok(()),
        (Some(unit), Some(f)) => {
            validate_label("alt_unit", unit, 20)?;
            if f <= 1 {
                return Err(ValidationError::OutOfRange {
                    field: "alt_unit_factor".to_string(),
                    min: 2,
                    max: i64::MAX,
                });
            }
            Ok(())
        }
        (Some(_), None) => Err(ValidationError::Required {
            field: "alt_unit_factor".to_string(),
        }),
        (None, Some(_)) => Err(ValidationError::Required {
            field: "alt_unit".to_string(),
        }),
    }
}

// =============================================================================
// Collection & Window Validators
// =============================================================================

/// Validates the number of lines on a sale.
pub fn validate_item_count(count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }

    if count > MAX_SALE_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_SALE_ITEMS as i64,
        });
    }

    Ok(())
}

/// Validates an inclusive report window.
pub fn validate_date_range(start: NaiveDate, end: NaiveDate) -> ValidationResult<()> {
    if end < start {
        return Err(ValidationError::InvalidFormat {
            field: "date range".to_string(),
            reason: format!("end {} is before start {}", end, start),
        });
    }

    Ok(())
}

/// Validates a UUID string.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
