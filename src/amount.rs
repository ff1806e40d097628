//! Exact arithmetic over non-negative integer strings.
//!
//! Amounts never pass through a float or a fixed width integer; digits are
//! added and subtracted column by column so any length is exact.
use super::error::RequestError;

/// `true` when `amount` is a canonical non-negative integer: ascii digits only,
/// no sign, no decimal point and no leading zero unless the value is `"0"`.
pub fn is_valid(amount: &str) -> bool {
    let bytes = amount.as_bytes();
    match bytes {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        _ => bytes.iter().all(u8::is_ascii_digit),
    }
}

pub fn add(a: &str, b: &str) -> Result<String, RequestError> {
    check(a)?;
    check(b)?;

    let mut out = Vec::with_capacity(a.len().max(b.len()) + 1);
    let mut carry = 0u8;
    let mut lhs = a.bytes().rev();
    let mut rhs = b.bytes().rev();

    loop {
        let (x, y) = (lhs.next(), rhs.next());
        if x.is_none() && y.is_none() {
            break;
        }
        let sum = digit(x) + digit(y) + carry;
        out.push(b'0' + sum % 10);
        carry = sum / 10;
    }
    if carry > 0 {
        out.push(b'0' + carry);
    }

    Ok(finish(out))
}

/// `a - b`, refusing to go below zero.
pub fn reduce(a: &str, b: &str) -> Result<String, RequestError> {
    check(a)?;
    check(b)?;
    if compare(a, b).is_lt() {
        return Err(RequestError::validation(
            "result of reduce is not valid: the amount would become negative",
        ));
    }

    let mut out = Vec::with_capacity(a.len());
    let mut borrow = 0u8;
    let mut rhs = b.bytes().rev();

    for x in a.bytes().rev() {
        let y = digit(rhs.next()) + borrow;
        let x = x - b'0';
        if x < y {
            out.push(b'0' + x + 10 - y);
            borrow = 1;
        } else {
            out.push(b'0' + x - y);
            borrow = 0;
        }
    }

    Ok(finish(out))
}

/// Numeric ordering of two valid amounts.
pub fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn check(amount: &str) -> Result<(), RequestError> {
    if is_valid(amount) {
        Ok(())
    } else {
        Err(RequestError::validation(format!(
            "'{amount}' is not a string representing a positive integer"
        )))
    }
}

fn digit(d: Option<u8>) -> u8 {
    d.map(|d| d - b'0').unwrap_or(0)
}

// digits were collected least significant first
fn finish(mut digits: Vec<u8>) -> String {
    while digits.len() > 1 && digits.last() == Some(&b'0') {
        digits.pop();
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}
