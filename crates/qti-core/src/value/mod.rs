//! The QTI typed value model.
//!
//! Every runtime comparison in a test session (precondition checks, branch
//! rules, outcome lookups) goes through [`Value`]. A value is either `Null`
//! or a container of one or more [`Single`] payloads sharing one
//! [`BaseType`]. Empty containers do not exist: constructors collapse them
//! to `Null`.

mod parse;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

pub use parse::{is_valid_identifier, ValueParseError};

/// The eleven QTI base types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseType {
    Identifier,
    Boolean,
    Integer,
    Float,
    String,
    Point,
    Pair,
    DirectedPair,
    Duration,
    File,
    Uri,
}

impl BaseType {
    pub const ALL: [BaseType; 11] = [
        BaseType::Identifier,
        BaseType::Boolean,
        BaseType::Integer,
        BaseType::Float,
        BaseType::String,
        BaseType::Point,
        BaseType::Pair,
        BaseType::DirectedPair,
        BaseType::Duration,
        BaseType::File,
        BaseType::Uri,
    ];

    /// The name used for this base type in QTI documents.
    pub fn qti_name(self) -> &'static str {
        match self {
            BaseType::Identifier => "identifier",
            BaseType::Boolean => "boolean",
            BaseType::Integer => "integer",
            BaseType::Float => "float",
            BaseType::String => "string",
            BaseType::Point => "point",
            BaseType::Pair => "pair",
            BaseType::DirectedPair => "directedPair",
            BaseType::Duration => "duration",
            BaseType::File => "file",
            BaseType::Uri => "uri",
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qti_name())
    }
}

impl FromStr for BaseType {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BaseType::ALL
            .iter()
            .copied()
            .find(|bt| bt.qti_name() == s)
            .ok_or_else(|| ValueParseError::UnknownBaseType(s.to_string()))
    }
}

/// How many payloads a value carries, and how they relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    Single,
    Multiple,
    Ordered,
    Record,
}

impl Cardinality {
    pub fn qti_name(self) -> &'static str {
        match self {
            Cardinality::Single => "single",
            Cardinality::Multiple => "multiple",
            Cardinality::Ordered => "ordered",
            Cardinality::Record => "record",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qti_name())
    }
}

impl FromStr for Cardinality {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Cardinality::Single),
            "multiple" => Ok(Cardinality::Multiple),
            "ordered" => Ok(Cardinality::Ordered),
            "record" => Ok(Cardinality::Record),
            other => Err(ValueParseError::UnknownCardinality(other.to_string())),
        }
    }
}

/// Cardinality plus base type. Records have no single base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub cardinality: Cardinality,
    pub base_type: Option<BaseType>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base_type {
            Some(bt) => write!(f, "{}:{}", self.cardinality, bt),
            None => write!(f, "{}", self.cardinality),
        }
    }
}

/// One non-null payload of a given base type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "baseType", content = "value", rename_all = "camelCase")]
pub enum Single {
    Identifier(String),
    Boolean(bool),
    Integer(i64),
    Float(#[serde(with = "float_literal")] f64),
    String(String),
    Point(i32, i32),
    /// Unordered pair of identifiers.
    Pair(String, String),
    /// Ordered pair of identifiers.
    DirectedPair(String, String),
    /// Seconds; never negative.
    Duration(#[serde(with = "float_literal")] f64),
    File(String),
    Uri(String),
}

impl Single {
    pub fn base_type(&self) -> BaseType {
        match self {
            Single::Identifier(_) => BaseType::Identifier,
            Single::Boolean(_) => BaseType::Boolean,
            Single::Integer(_) => BaseType::Integer,
            Single::Float(_) => BaseType::Float,
            Single::String(_) => BaseType::String,
            Single::Point(..) => BaseType::Point,
            Single::Pair(..) => BaseType::Pair,
            Single::DirectedPair(..) => BaseType::DirectedPair,
            Single::Duration(_) => BaseType::Duration,
            Single::File(_) => BaseType::File,
            Single::Uri(_) => BaseType::Uri,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Single::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Single {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Single::Identifier(a), Single::Identifier(b)) => a == b,
            (Single::Boolean(a), Single::Boolean(b)) => a == b,
            (Single::Integer(a), Single::Integer(b)) => a == b,
            (Single::Float(a), Single::Float(b)) => a == b,
            (Single::String(a), Single::String(b)) => a == b,
            (Single::Point(ax, ay), Single::Point(bx, by)) => ax == bx && ay == by,
            (Single::Pair(a1, a2), Single::Pair(b1, b2)) => {
                (a1 == b1 && a2 == b2) || (a1 == b2 && a2 == b1)
            }
            (Single::DirectedPair(a1, a2), Single::DirectedPair(b1, b2)) => a1 == b1 && a2 == b2,
            (Single::Duration(a), Single::Duration(b)) => a == b,
            (Single::File(a), Single::File(b)) => a == b,
            (Single::Uri(a), Single::Uri(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Single {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Single::Identifier(s) | Single::String(s) | Single::File(s) | Single::Uri(s) => {
                f.write_str(s)
            }
            Single::Boolean(b) => write!(f, "{b}"),
            Single::Integer(i) => write!(f, "{i}"),
            Single::Float(x) | Single::Duration(x) => write!(f, "{x}"),
            Single::Point(x, y) => write!(f, "{x} {y}"),
            Single::Pair(a, b) | Single::DirectedPair(a, b) => write!(f, "{a} {b}"),
        }
    }
}

/// The payload list of a multiple or ordered value.
///
/// Always non-empty and homogeneous in base type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawContainer")]
pub struct Container {
    base_type: BaseType,
    values: Vec<Single>,
}

#[derive(Deserialize)]
struct RawContainer {
    base_type: BaseType,
    values: Vec<Single>,
}

impl TryFrom<RawContainer> for Container {
    type Error = ValueParseError;

    fn try_from(raw: RawContainer) -> Result<Self, Self::Error> {
        if raw.values.is_empty() {
            return Err(ValueParseError::EmptyContainer);
        }
        check_homogeneous(raw.base_type, &raw.values)?;
        Ok(Container {
            base_type: raw.base_type,
            values: raw.values,
        })
    }
}

impl Container {
    pub fn base_type(&self) -> BaseType {
        self.base_type
    }

    pub fn values(&self) -> &[Single] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn count_of(&self, needle: &Single) -> usize {
        self.values.iter().filter(|v| *v == needle).count()
    }

    /// Multiset equality: same elements with the same multiplicities.
    fn multiset_eq(&self, other: &Container) -> bool {
        self.base_type == other.base_type
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .all(|v| self.count_of(v) == other.count_of(v))
    }

    fn sequence_eq(&self, other: &Container) -> bool {
        self.base_type == other.base_type && self.values == other.values
    }
}

fn check_homogeneous(base_type: BaseType, values: &[Single]) -> Result<(), ValueParseError> {
    match values.iter().find(|v| v.base_type() != base_type) {
        Some(bad) => Err(ValueParseError::MixedBaseTypes {
            expected: base_type,
            found: bad.base_type(),
        }),
        None => Ok(()),
    }
}

/// A QTI runtime value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "cardinality", rename_all = "camelCase")]
pub enum Value {
    #[default]
    Null,
    Single(Single),
    Multiple(Container),
    Ordered(Container),
    #[serde(deserialize_with = "non_empty_record")]
    Record(BTreeMap<String, Single>),
}

fn non_empty_record<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Single>, D::Error> {
    let fields = BTreeMap::<String, Single>::deserialize(deserializer)?;
    if fields.is_empty() {
        return Err(D::Error::custom(ValueParseError::EmptyContainer));
    }
    Ok(fields)
}

/// Finite floats travel as numbers; `NaN`, `INF` and `-INF` as the QTI
/// literals.
mod float_literal {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if x.is_nan() {
            serializer.serialize_str("NaN")
        } else if x.is_infinite() {
            serializer.serialize_str(if *x > 0.0 { "INF" } else { "-INF" })
        } else {
            serializer.serialize_f64(*x)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of NaN, INF, -INF")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            super::parse::parse_float(v).map_err(E::custom)
        }
    }
}

impl Value {
    pub fn boolean(b: bool) -> Self {
        Value::Single(Single::Boolean(b))
    }

    pub fn integer(i: i64) -> Self {
        Value::Single(Single::Integer(i))
    }

    pub fn float(x: f64) -> Self {
        Value::Single(Single::Float(x))
    }

    pub fn identifier(s: impl Into<String>) -> Self {
        Value::Single(Single::Identifier(s.into()))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Single(Single::String(s.into()))
    }

    pub fn duration(seconds: f64) -> Self {
        Value::Single(Single::Duration(seconds))
    }

    /// Build a multiple value. Empty input yields `Null`.
    pub fn multiple(base_type: BaseType, values: Vec<Single>) -> Result<Self, ValueParseError> {
        Self::list(base_type, values).map(|c| c.map_or(Value::Null, Value::Multiple))
    }

    /// Build an ordered value. Empty input yields `Null`.
    pub fn ordered(base_type: BaseType, values: Vec<Single>) -> Result<Self, ValueParseError> {
        Self::list(base_type, values).map(|c| c.map_or(Value::Null, Value::Ordered))
    }

    /// Build a record value. An empty map yields `Null`.
    pub fn record(fields: BTreeMap<String, Single>) -> Self {
        if fields.is_empty() {
            Value::Null
        } else {
            Value::Record(fields)
        }
    }

    fn list(base_type: BaseType, values: Vec<Single>) -> Result<Option<Container>, ValueParseError> {
        if values.is_empty() {
            return Ok(None);
        }
        check_homogeneous(base_type, &values)?;
        Ok(Some(Container { base_type, values }))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `None` for `Null`.
    pub fn cardinality(&self) -> Option<Cardinality> {
        match self {
            Value::Null => None,
            Value::Single(_) => Some(Cardinality::Single),
            Value::Multiple(_) => Some(Cardinality::Multiple),
            Value::Ordered(_) => Some(Cardinality::Ordered),
            Value::Record(_) => Some(Cardinality::Record),
        }
    }

    /// `None` for `Null` and for records.
    pub fn base_type(&self) -> Option<BaseType> {
        match self {
            Value::Null | Value::Record(_) => None,
            Value::Single(s) => Some(s.base_type()),
            Value::Multiple(c) | Value::Ordered(c) => Some(c.base_type()),
        }
    }

    pub fn signature(&self) -> Option<Signature> {
        self.cardinality().map(|cardinality| Signature {
            cardinality,
            base_type: self.base_type(),
        })
    }

    /// True only for a single boolean `true`. Nulls and every other
    /// signature count as false.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Single(Single::Boolean(true)))
    }

    pub fn as_single(&self) -> Option<&Single> {
        match self {
            Value::Single(s) => Some(s),
            _ => None,
        }
    }

    /// QTI equality: any two nulls are equal, otherwise structural equality.
    pub fn qti_equals(&self, other: &Value) -> bool {
        (self.is_null() && other.is_null()) || self == other
    }

    /// Containment test used by the `contains` operator.
    ///
    /// For ordered values `other` must appear as a contiguous run; for
    /// multiple values `other` must be a sub-multiset. Other cardinalities
    /// never contain anything.
    pub fn contains(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Ordered(hay), Value::Ordered(needle)) => {
                hay.base_type == needle.base_type
                    && hay
                        .values
                        .windows(needle.values.len())
                        .any(|w| w == needle.values.as_slice())
            }
            (Value::Multiple(hay), Value::Multiple(needle)) => {
                hay.base_type == needle.base_type
                    && needle
                        .values
                        .iter()
                        .all(|v| needle.count_of(v) <= hay.count_of(v))
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Single(a), Value::Single(b)) => a == b,
            (Value::Multiple(a), Value::Multiple(b)) => a.multiset_eq(b),
            (Value::Ordered(a), Value::Ordered(b)) => a.sequence_eq(b),
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Single> for Value {
    fn from(s: Single) -> Self {
        Value::Single(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Single(s) => write!(f, "{s}"),
            Value::Multiple(c) | Value::Ordered(c) => {
                let open = if matches!(self, Value::Ordered(_)) { '<' } else { '[' };
                let close = if open == '<' { '>' } else { ']' };
                write!(f, "{open}")?;
                for (i, v) in c.values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "{close}")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(names: &[&str]) -> Vec<Single> {
        names
            .iter()
            .map(|n| Single::Identifier(n.to_string()))
            .collect()
    }

    #[test]
    fn base_type_names_round_trip() {
        for bt in BaseType::ALL {
            assert_eq!(bt.qti_name().parse::<BaseType>().unwrap(), bt);
        }
        assert!("matrix".parse::<BaseType>().is_err());
    }

    #[test]
    fn empty_containers_collapse_to_null() {
        assert!(Value::multiple(BaseType::Integer, vec![]).unwrap().is_null());
        assert!(Value::ordered(BaseType::Integer, vec![]).unwrap().is_null());
        assert!(Value::record(BTreeMap::new()).is_null());
    }

    #[test]
    fn mixed_base_types_rejected() {
        let err = Value::multiple(
            BaseType::Integer,
            vec![Single::Integer(1), Single::Float(2.0)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValueParseError::MixedBaseTypes {
                expected: BaseType::Integer,
                found: BaseType::Float
            }
        ));
    }

    #[test]
    fn null_has_no_signature() {
        assert_eq!(Value::Null.signature(), None);
        assert_eq!(Value::Null.base_type(), None);
        let sig = Value::integer(3).signature().unwrap();
        assert_eq!(sig.cardinality, Cardinality::Single);
        assert_eq!(sig.base_type, Some(BaseType::Integer));
        assert_eq!(sig.to_string(), "single:integer");
    }

    #[test]
    fn record_signature_has_no_base_type() {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), Single::Integer(1));
        let sig = Value::record(fields).signature().unwrap();
        assert_eq!(sig.cardinality, Cardinality::Record);
        assert_eq!(sig.base_type, None);
    }

    #[test]
    fn nulls_are_qti_equal() {
        assert!(Value::Null.qti_equals(&Value::Null));
        assert!(!Value::Null.qti_equals(&Value::boolean(false)));
    }

    #[test]
    fn pair_equality_is_unordered() {
        let a = Single::Pair("A".into(), "B".into());
        let b = Single::Pair("B".into(), "A".into());
        assert_eq!(a, b);
    }

    #[test]
    fn directed_pair_equality_is_ordered() {
        let a = Single::DirectedPair("A".into(), "B".into());
        let b = Single::DirectedPair("B".into(), "A".into());
        assert_ne!(a, b);
        assert_eq!(a, Single::DirectedPair("A".into(), "B".into()));
    }

    #[test]
    fn multiple_equality_is_multiset() {
        let aab = Value::multiple(BaseType::Identifier, ids(&["A", "A", "B"])).unwrap();
        let ab = Value::multiple(BaseType::Identifier, ids(&["A", "B"])).unwrap();
        let ba = Value::multiple(BaseType::Identifier, ids(&["B", "A"])).unwrap();
        let abb = Value::multiple(BaseType::Identifier, ids(&["A", "B", "B"])).unwrap();
        assert_ne!(aab, ab);
        assert_eq!(ab, ba);
        assert_ne!(aab, abb);
    }

    #[test]
    fn ordered_equality_respects_order() {
        let ab = Value::ordered(BaseType::Identifier, ids(&["A", "B"])).unwrap();
        let ba = Value::ordered(BaseType::Identifier, ids(&["B", "A"])).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn multiple_and_ordered_never_equal() {
        let m = Value::multiple(BaseType::Identifier, ids(&["A"])).unwrap();
        let o = Value::ordered(BaseType::Identifier, ids(&["A"])).unwrap();
        assert_ne!(m, o);
    }

    #[test]
    fn ordered_contains_contiguous_run() {
        let hay = Value::ordered(BaseType::Identifier, ids(&["A", "B", "C", "D"])).unwrap();
        let run = Value::ordered(BaseType::Identifier, ids(&["B", "C"])).unwrap();
        let gap = Value::ordered(BaseType::Identifier, ids(&["B", "D"])).unwrap();
        assert!(hay.contains(&run));
        assert!(!hay.contains(&gap));
    }

    #[test]
    fn multiple_contains_sub_multiset() {
        let hay = Value::multiple(BaseType::Identifier, ids(&["A", "B", "A"])).unwrap();
        let twice = Value::multiple(BaseType::Identifier, ids(&["A", "A"])).unwrap();
        let thrice = Value::multiple(BaseType::Identifier, ids(&["A", "A", "A"])).unwrap();
        assert!(hay.contains(&twice));
        assert!(!hay.contains(&thrice));
    }

    #[test]
    fn only_single_true_is_true() {
        assert!(Value::boolean(true).is_true());
        assert!(!Value::boolean(false).is_true());
        assert!(!Value::Null.is_true());
        assert!(!Value::integer(1).is_true());
        assert!(!Value::string("true").is_true());
    }

    #[test]
    fn display_forms() {
        let m = Value::multiple(BaseType::Integer, vec![Single::Integer(1), Single::Integer(2)])
            .unwrap();
        assert_eq!(m.to_string(), "[1, 2]");
        assert_eq!(Value::Single(Single::Point(3, 4)).to_string(), "3 4");
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn serde_rejects_empty_container() {
        let json = r#"{"cardinality":"multiple","base_type":"integer","values":[]}"#;
        assert!(serde_json::from_str::<Value>(json).is_err());
    }

    #[test]
    fn serde_preserves_value() {
        let v = Value::ordered(BaseType::Identifier, ids(&["X", "Y"])).unwrap();
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn serde_rejects_empty_record() {
        let json = r#"{"cardinality":"record"}"#;
        assert!(serde_json::from_str::<Value>(json).is_err());

        let mut fields = BTreeMap::new();
        fields.insert("A".to_string(), Single::Integer(1));
        let json = serde_json::to_string(&Value::record(fields)).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cardinality(), Some(Cardinality::Record));
    }

    #[test]
    fn non_finite_floats_use_qti_literals() {
        for (x, literal) in [
            (f64::INFINITY, "\"INF\""),
            (f64::NEG_INFINITY, "\"-INF\""),
            (f64::NAN, "\"NaN\""),
        ] {
            let json = serde_json::to_string(&Value::float(x)).unwrap();
            assert!(json.contains(literal), "{json}");
            let back: Value = serde_json::from_str(&json).unwrap();
            match back {
                Value::Single(Single::Float(y)) => {
                    assert!(y == x || (x.is_nan() && y.is_nan()), "{y}")
                }
                other => panic!("expected a float, got {other:?}"),
            }
        }
        let back: Value = serde_json::from_str(
            &serde_json::to_string(&Value::duration(f64::INFINITY)).unwrap(),
        )
        .unwrap();
        assert_eq!(back, Value::duration(f64::INFINITY));
        let finite: Value =
            serde_json::from_str(r#"{"cardinality":"single","baseType":"float","value":2}"#)
                .unwrap();
        assert_eq!(finite, Value::float(2.0));
    }

    fn ints(values: &[i64]) -> Vec<Single> {
        values.iter().map(|i| Single::Integer(*i)).collect()
    }

    fn multiple(values: &[i64]) -> Value {
        Value::multiple(BaseType::Integer, ints(values)).unwrap()
    }

    fn ordered(values: &[i64]) -> Value {
        Value::ordered(BaseType::Integer, ints(values)).unwrap()
    }

    /// A small-alphabet list, so repeats are common, and a permutation of it.
    fn list_and_permutation() -> impl Strategy<Value = (Vec<i64>, Vec<i64>)> {
        prop::collection::vec(0i64..4, 1..8)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    }

    proptest! {
        #[test]
        fn multiple_equals_every_permutation((values, permuted) in list_and_permutation()) {
            prop_assert!(multiple(&values).qti_equals(&multiple(&permuted)));
            prop_assert!(multiple(&permuted).qti_equals(&multiple(&values)));
        }

        #[test]
        fn changing_a_count_breaks_multiple_equality(
            (values, permuted) in list_and_permutation(),
            pick in any::<prop::sample::Index>(),
        ) {
            let i = pick.index(values.len());
            let original = multiple(&values);

            let mut extra = permuted.clone();
            extra.push(values[i]);
            prop_assert!(!original.qti_equals(&multiple(&extra)));

            let mut replaced = permuted.clone();
            let j = pick.index(replaced.len());
            replaced[j] = 99;
            prop_assert!(!original.qti_equals(&multiple(&replaced)));

            if values.len() > 1 {
                let mut fewer = permuted;
                fewer.remove(j);
                prop_assert!(!original.qti_equals(&multiple(&fewer)));
            }
        }

        #[test]
        fn ordered_equality_needs_the_same_order((values, permuted) in list_and_permutation()) {
            prop_assert_eq!(ordered(&values).qti_equals(&ordered(&permuted)), values == permuted);
            prop_assert!(!ordered(&values).qti_equals(&multiple(&values)));
        }
    }
}
