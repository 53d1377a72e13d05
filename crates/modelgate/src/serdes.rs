/// schema! applies the standard derive set for config-facing types. Wire types that must
/// match a provider's exact casing derive serde by hand instead.
macro_rules! schema {
	($item:item) => {
		#[derive(Debug, Clone, ::serde::Serialize, ::serde::Deserialize)]
		#[serde(rename_all = "camelCase")]
		$item
	};
}

pub(crate) use schema;

pub fn is_default<T: Default + PartialEq>(t: &T) -> bool {
	*t == Default::default()
}

/// The value for a `#[serde(flatten)] rest` passthrough field on hand-constructed
/// values. Flattened fields must serialize as a map, so `Value::Null` is not usable.
pub fn empty_rest() -> serde_json::Value {
	serde_json::Value::Object(serde_json::Map::new())
}
