//! Invocation codec: flat, self-describing encoding of a method's arguments.
//!
//! A method's parameter list is a Rust tuple implementing [`Params`]. Each
//! argument is serialized to JSON on its own, and both stored fields
//! (`param_types`, `param_values`) use length-prefixed framing, one
//! `<byte-length>:<bytes>;` item per parameter. The reader never scans for a
//! separator inside an item, so payload content cannot collide with framing.
//!
//! An empty parameter list encodes to an empty string and decodes back to an
//! empty list.
//!
//! Type identifiers come from [`ParamType`], never from the compiler, so a
//! record written by one build resolves in the next. Application types name
//! themselves with [`param_type!`](crate::param_type):
//!
//! ```ignore
//! outbox_rs::param_type!(Order => "shop.Order");
//! ```

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::type_name;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// The two stored invocation fields for one argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedParams {
    pub param_types: String,
    pub param_values: String,
}

/// Stable identifier of an argument type, written to `param_types`.
///
/// Renaming the Rust type does not change the identifier; changing the
/// identifier does, and records still carrying the old one fail with
/// [`Error::TypeResolution`].
pub trait ParamType {
    fn param_type() -> Cow<'static, str>;
}

/// Implement [`ParamType`] with a fixed identifier for each listed type.
#[macro_export]
macro_rules! param_type {
    ($($ty:ty => $name:literal),+ $(,)?) => {
        $(
            impl $crate::codec::ParamType for $ty {
                fn param_type() -> ::std::borrow::Cow<'static, str> {
                    ::std::borrow::Cow::Borrowed($name)
                }
            }
        )+
    };
}

param_type!(
    bool => "bool",
    char => "char",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    i128 => "i128",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    u128 => "u128",
    f32 => "f32",
    f64 => "f64",
    String => "string",
    Value => "json",
    uuid::Uuid => "uuid",
    chrono::DateTime<chrono::Utc> => "timestamp",
);

impl<T: ParamType> ParamType for Vec<T> {
    fn param_type() -> Cow<'static, str> {
        Cow::Owned(format!("list<{}>", T::param_type()))
    }
}

impl<T: ParamType> ParamType for Option<T> {
    fn param_type() -> Cow<'static, str> {
        Cow::Owned(format!("option<{}>", T::param_type()))
    }
}

impl<K: ParamType, V: ParamType> ParamType for BTreeMap<K, V> {
    fn param_type() -> Cow<'static, str> {
        Cow::Owned(format!("map<{},{}>", K::param_type(), V::param_type()))
    }
}

// Same wire shape as the ordered map.
impl<K: ParamType, V: ParamType, H> ParamType for HashMap<K, V, H> {
    fn param_type() -> Cow<'static, str> {
        <BTreeMap<K, V>>::param_type()
    }
}

/// A typed parameter list that can be stored in an outbox row and replayed.
///
/// Implemented for `()` and tuples of up to six members that are
/// serializable and implement [`ParamType`].
pub trait Params: Sized + Send + 'static {
    /// Type identifier of each formal parameter, in order.
    fn type_names() -> Vec<String>;

    /// Serialize each argument independently.
    fn to_payloads(&self) -> Result<Vec<String>>;

    /// Rebuild the typed arguments from decoded values.
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

impl Params for () {
    fn type_names() -> Vec<String> {
        Vec::new()
    }

    fn to_payloads(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn from_values(values: Vec<Value>) -> Result<Self> {
        check_arity(values.len(), 0)
    }
}

macro_rules! impl_params {
    ($($ty:ident => $idx:tt),+) => {
        impl<$($ty),+> Params for ($($ty,)+)
        where
            $($ty: ParamType + Serialize + DeserializeOwned + Send + 'static),+
        {
            fn type_names() -> Vec<String> {
                vec![$(<$ty as ParamType>::param_type().into_owned()),+]
            }

            fn to_payloads(&self) -> Result<Vec<String>> {
                Ok(vec![$(to_payload(&self.$idx)?),+])
            }

            fn from_values(values: Vec<Value>) -> Result<Self> {
                check_arity(values.len(), Self::type_names().len())?;
                let mut values = values.into_iter();
                Ok(($(next_arg::<$ty>(&mut values, $idx)?,)+))
            }
        }
    };
}

impl_params!(A => 0);
impl_params!(A => 0, B => 1);
impl_params!(A => 0, B => 1, C => 2);
impl_params!(A => 0, B => 1, C => 2, D => 3);
impl_params!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_params!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);

/// Encode a typed argument list into its stored fields.
pub fn encode<P: Params>(args: &P) -> Result<EncodedParams> {
    encode_parts(&P::type_names(), &args.to_payloads()?)
}

/// Encode already-serialized payloads alongside their type identifiers.
pub fn encode_parts(type_names: &[String], payloads: &[String]) -> Result<EncodedParams> {
    if type_names.len() != payloads.len() {
        return Err(Error::UnsupportedArgument(format!(
            "{} parameter types but {} argument values",
            type_names.len(),
            payloads.len()
        )));
    }
    Ok(EncodedParams {
        param_types: frame(type_names),
        param_values: frame(payloads),
    })
}

/// Split a stored `param_types` field into type identifiers.
pub fn decode_types(param_types: &str) -> Result<Vec<String>> {
    unframe(param_types)
}

/// Decode stored fields into one JSON value per resolved parameter type.
///
/// Fails with [`Error::MalformedRecord`] if the two fields, or the fields and
/// the resolved signature, disagree on the number of parameters.
pub fn decode(param_types: &str, param_values: &str, resolved: &[String]) -> Result<Vec<Value>> {
    let types = unframe(param_types)?;
    let payloads = unframe(param_values)?;

    if types.len() != payloads.len() {
        return Err(Error::MalformedRecord(format!(
            "{} parameter types but {} parameter values",
            types.len(),
            payloads.len()
        )));
    }
    check_arity(payloads.len(), resolved.len())?;

    payloads
        .iter()
        .zip(resolved)
        .map(|(payload, ty)| {
            serde_json::from_str(payload).map_err(|e| {
                Error::MalformedRecord(format!("cannot decode {ty} argument: {e}"))
            })
        })
        .collect()
}

fn to_payload<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::UnsupportedArgument(format!("{}: {e}", type_name::<T>())))
}

fn next_arg<T: DeserializeOwned>(values: &mut impl Iterator<Item = Value>, idx: usize) -> Result<T> {
    let value = values
        .next()
        .ok_or_else(|| Error::MalformedRecord(format!("missing argument {idx}")))?;
    serde_json::from_value(value).map_err(|e| {
        Error::MalformedRecord(format!(
            "argument {idx} is not a valid {}: {e}",
            type_name::<T>()
        ))
    })
}

fn check_arity(actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::MalformedRecord(format!(
            "expected {expected} arguments, found {actual}"
        )))
    }
}

fn frame(items: &[String]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(&item.len().to_string());
        out.push(':');
        out.push_str(item);
        out.push(';');
    }
    out
}

fn unframe(field: &str) -> Result<Vec<String>> {
    // A generic split of "" would yield one empty item.
    if field.is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let mut rest = field;
    while !rest.is_empty() {
        let (len, tail) = rest
            .split_once(':')
            .ok_or_else(|| Error::MalformedRecord("missing length prefix".to_string()))?;
        let len: usize = len
            .parse()
            .map_err(|_| Error::MalformedRecord(format!("bad length prefix {len:?}")))?;
        let item = tail
            .get(..len)
            .ok_or_else(|| Error::MalformedRecord("truncated item".to_string()))?;
        rest = tail[len..]
            .strip_prefix(';')
            .ok_or_else(|| Error::MalformedRecord("missing item terminator".to_string()))?;
        items.push(item.to_string());
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_field_is_empty_list() {
        assert!(unframe("").unwrap().is_empty());
        assert_eq!(frame(&[]), "");
    }

    #[test]
    fn empty_item_is_distinct_from_empty_list() {
        let framed = frame(&[String::new()]);
        assert_eq!(framed, "0:;");
        assert_eq!(unframe(&framed).unwrap(), vec![String::new()]);
    }

    #[test]
    fn separators_inside_items_survive() {
        let items = vec!["a;b:c".to_string(), "12:;".to_string(), "é,ü".to_string()];
        assert_eq!(unframe(&frame(&items)).unwrap(), items);
    }

    #[test]
    fn rejects_truncated_and_unterminated_items() {
        assert!(matches!(unframe("5:abc"), Err(Error::MalformedRecord(_))));
        assert!(matches!(unframe("3:abcd;"), Err(Error::MalformedRecord(_))));
        assert!(matches!(unframe("x:abc;"), Err(Error::MalformedRecord(_))));
        assert!(matches!(unframe("abc"), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn nested_type_identifiers_compose() {
        assert_eq!(<Vec<Option<u8>>>::param_type(), "list<option<u8>>");
        assert_eq!(<HashMap<String, i64>>::param_type(), "map<string,i64>");
        assert_eq!(
            <BTreeMap<String, Vec<String>>>::param_type(),
            "map<string,list<string>>"
        );
    }

    #[test]
    fn rejects_length_splitting_a_multibyte_char() {
        // "é" is two bytes; a length of 1 lands inside it.
        assert!(matches!(unframe("1:é;"), Err(Error::MalformedRecord(_))));
    }
}
