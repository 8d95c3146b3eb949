use std::error::Error as StdError;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};

use mptree_core::Value;

type BoxError = Box<dyn StdError + Sync + Send>;

/// Binds a loosely-typed [`Value`] to whatever parameter type the server inferred.
///
/// Generated SQL leaves parameter types to inference (`LENGTH(path) = $3` is `int4`,
/// `LIMIT $3` is `int8`), so integers are narrowed or widened at bind time. Text is parsed
/// into the column type for the types [`from_column`] renders as text.
#[derive(Debug)]
pub(crate) struct PgParam<'a>(pub(crate) &'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    PgNumeric(v.to_string()).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    v.to_string().to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Real(v) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            Value::Real(v) if *ty == Type::NUMERIC => PgNumeric(v.to_string()).to_sql(ty, out),
            Value::Real(v) => v.to_sql(ty, out),
            Value::Text(s) => text_to_sql(s, ty, out),
            Value::Blob(b) => b.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::UUID {
        uuid::Uuid::parse_str(s)?.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc).to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP {
        NaiveDateTime::from_str(s)?.to_sql(ty, out)
    } else if *ty == Type::DATE {
        NaiveDate::from_str(s)?.to_sql(ty, out)
    } else if *ty == Type::TIME {
        NaiveTime::from_str(s)?.to_sql(ty, out)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        PgNumeric(s.to_owned()).to_sql(ty, out)
    } else {
        s.to_sql(ty, out)
    }
}

/// Reads one column into a [`Value`].
///
/// Numbers, booleans and bytes keep their kind. Temporal, uuid, json and numeric columns come
/// back as their canonical text, as do all text-like types. Anything else is returned as the
/// raw wire bytes.
pub(crate) fn from_column(row: &postgres::Row, index: usize) -> Result<Value, postgres::Error> {
    let ty = row.columns()[index].type_();
    let value = if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)?.map(|v| Value::Integer(v.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)?.map(|v| Value::Integer(v.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index)?.map(Value::Integer)
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)?.map(Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)?.map(|v| Value::Real(v.into()))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index)?.map(Value::Real)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(index)?.map(Value::Blob)
    } else if *ty == Type::UUID {
        text(row.try_get::<_, Option<uuid::Uuid>>(index)?)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(index)?
            .map(|v| Value::Text(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(index)?
            .map(|v| Value::Text(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
    } else if *ty == Type::DATE {
        text(row.try_get::<_, Option<NaiveDate>>(index)?)
    } else if *ty == Type::TIME {
        text(row.try_get::<_, Option<NaiveTime>>(index)?)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        text(row.try_get::<_, Option<serde_json::Value>>(index)?)
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<PgNumeric>>(index)?.map(|v| Value::Text(v.0))
    } else if <String as FromSql>::accepts(ty) {
        row.try_get::<_, Option<String>>(index)?.map(Value::Text)
    } else {
        row.try_get::<_, Option<RawBytes>>(index)?.map(|v| Value::Blob(v.0))
    };
    Ok(value.unwrap_or(Value::Null))
}

fn text<T: ToString>(value: Option<T>) -> Option<Value> {
    value.map(|v| Value::Text(v.to_string()))
}

/// Wire bytes of a column type with no dedicated mapping.
struct RawBytes(Vec<u8>);

impl<'a> FromSql<'a> for RawBytes {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawBytes(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// A `numeric` carried as its decimal text.
///
/// The binary format is a header of `ndigits`, `weight`, `sign` and `dscale` followed by
/// base-10000 digits; the value is `sum(digit[i] * 10000^(weight - i))`.
#[derive(Debug, Clone, PartialEq)]
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, mut raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() < 8 {
            return Err("numeric header is truncated".into());
        }
        let ndigits = raw.get_i16();
        let weight = raw.get_i16();
        let sign = raw.get_u16();
        let dscale = raw.get_u16();
        match sign {
            NUMERIC_NAN => return Ok(PgNumeric("NaN".into())),
            NUMERIC_PINF => return Ok(PgNumeric("Infinity".into())),
            NUMERIC_NINF => return Ok(PgNumeric("-Infinity".into())),
            NUMERIC_POS | NUMERIC_NEG => {}
            other => return Err(format!("unknown numeric sign {other:#06x}").into()),
        }
        let ndigits = usize::try_from(ndigits)?;
        if raw.len() != ndigits * 2 {
            return Err("numeric digit count does not match payload".into());
        }
        let digits: Vec<i16> = (0..ndigits).map(|_| raw.get_i16()).collect();
        let digit_at = |index: i32| -> i16 {
            usize::try_from(index)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0)
        };

        let weight = i32::from(weight);
        let mut out = String::new();
        if sign == NUMERIC_NEG && !digits.is_empty() {
            out.push('-');
        }
        if weight < 0 {
            out.push('0');
        } else {
            for i in 0..=weight {
                if i == 0 {
                    out.push_str(&digit_at(i).to_string());
                } else {
                    out.push_str(&format!("{:04}", digit_at(i)));
                }
            }
        }
        if dscale > 0 {
            let dscale = usize::from(dscale);
            let groups = dscale.div_ceil(4) as i32;
            let mut frac = String::with_capacity(groups as usize * 4);
            for j in 1..=groups {
                frac.push_str(&format!("{:04}", digit_at(weight + j)));
            }
            frac.truncate(dscale);
            out.push('.');
            out.push_str(&frac);
        }
        Ok(PgNumeric(out))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

impl ToSql for PgNumeric {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let text = self.0.trim();
        let special = match text {
            "NaN" => Some(NUMERIC_NAN),
            "Infinity" | "inf" => Some(NUMERIC_PINF),
            "-Infinity" | "-inf" => Some(NUMERIC_NINF),
            _ => None,
        };
        if let Some(sign) = special {
            out.put_i16(0);
            out.put_i16(0);
            out.put_u16(sign);
            out.put_u16(0);
            return Ok(IsNull::No);
        }

        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        let empty = int_part.is_empty() && frac_part.is_empty();
        if empty || !is_digits(int_part) || !is_digits(frac_part) {
            return Err(format!("invalid numeric literal {:?}", self.0).into());
        }
        let dscale = u16::try_from(frac_part.len())?;

        let int_pad = (4 - int_part.len() % 4) % 4;
        let padded_int = format!("{}{}", "0".repeat(int_pad), int_part);
        let frac_pad = (4 - frac_part.len() % 4) % 4;
        let padded_frac = format!("{}{}", frac_part, "0".repeat(frac_pad));

        let group = |chunk: &[u8]| -> i16 {
            chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        };
        let mut digits: Vec<i16> = padded_int.as_bytes().chunks(4).map(group).collect();
        let mut weight = digits.len() as i32 - 1;
        digits.extend(padded_frac.as_bytes().chunks(4).map(group));

        let leading = digits.iter().take_while(|d| **d == 0).count();
        digits.drain(..leading);
        weight -= leading as i32;
        while digits.last() == Some(&0) {
            digits.pop();
        }
        if digits.is_empty() {
            weight = 0;
        }

        out.put_i16(i16::try_from(digits.len())?);
        out.put_i16(i16::try_from(weight)?);
        out.put_u16(if negative && !digits.is_empty() { NUMERIC_NEG } else { NUMERIC_POS });
        out.put_u16(dscale);
        for d in digits {
            out.put_i16(d);
        }
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_i16(ndigits);
        buf.put_i16(weight);
        buf.put_u16(sign);
        buf.put_u16(dscale);
        for d in digits {
            buf.put_i16(*d);
        }
        buf.to_vec()
    }

    fn decode(raw: &[u8]) -> String {
        PgNumeric::from_sql(&Type::NUMERIC, raw).unwrap().0
    }

    fn encode(text: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        PgNumeric(text.into()).to_sql(&Type::NUMERIC, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn numeric_decodes_integer_and_fraction_groups() {
        assert_eq!(decode(&wire(3, 1, NUMERIC_POS, 3, &[1, 2345, 6780])), "12345.678");
        assert_eq!(decode(&wire(1, -1, NUMERIC_NEG, 2, &[500])), "-0.05");
        assert_eq!(decode(&wire(1, 1, NUMERIC_POS, 0, &[7])), "70000");
        assert_eq!(decode(&wire(0, 0, NUMERIC_POS, 2, &[])), "0.00");
        assert_eq!(decode(&wire(0, 0, NUMERIC_NAN, 0, &[])), "NaN");
    }

    #[test]
    fn numeric_encodes_the_server_layout() {
        assert_eq!(encode("12345.678"), wire(3, 1, NUMERIC_POS, 3, &[1, 2345, 6780]));
        assert_eq!(encode("-0.05"), wire(1, -1, NUMERIC_NEG, 2, &[500]));
        assert_eq!(encode("70000"), wire(1, 1, NUMERIC_POS, 0, &[7]));
        assert_eq!(encode("0"), wire(0, 0, NUMERIC_POS, 0, &[]));
        assert_eq!(decode(&encode("1.5")), "1.5");
    }

    #[test]
    fn numeric_rejects_malformed_input() {
        let mut buf = BytesMut::new();
        assert!(PgNumeric("12a".into()).to_sql(&Type::NUMERIC, &mut buf).is_err());
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &[0, 1]).is_err());
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &wire(2, 0, NUMERIC_POS, 0, &[1])).is_err());
    }
}
