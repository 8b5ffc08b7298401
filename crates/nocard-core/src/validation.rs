use crate::error::{NoCardError, DEFAULT_MAX_DIGITS};

/// Checks a user-typed payment amount against the precision limit and the
/// available balance, returning the parsed value.
pub fn validate_amount(raw: &str, available: f64) -> Result<f64, NoCardError> {
    validate_amount_with(raw, available, DEFAULT_MAX_DIGITS)
}

pub fn validate_amount_with(
    raw: &str,
    available: f64,
    max_digits: usize,
) -> Result<f64, NoCardError> {
    let value = raw.trim();
    let well_formed = !value.is_empty()
        && value.chars().filter(|c| *c == '.').count() <= 1
        && value.chars().all(|c| c.is_ascii_digit() || c == '.')
        && value.chars().any(|c| c.is_ascii_digit());
    if !well_formed {
        return Err(NoCardError::invalid_amount(value));
    }

    let amount: f64 = value
        .parse()
        .map_err(|_| NoCardError::invalid_amount(value))?;
    if amount <= 0.0 {
        return Err(NoCardError::invalid_amount(value));
    }

    let digits = value.chars().filter(char::is_ascii_digit).count();
    if digits > max_digits {
        return Err(NoCardError::transaction_precision_with(value, max_digits));
    }

    if amount > available {
        return Err(NoCardError::insufficient_funds(amount, available));
    }

    Ok(amount)
}
