use gate_core::prelude::Strng;
use gate_core::strng;
use macro_rules_attribute::apply;

use crate::serdes::schema;

#[apply(schema!)]
#[derive(Default)]
pub struct Provider {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host_override: Option<Strng>,
}

impl super::Provider for Provider {
	const NAME: Strng = strng::literal!("mistral");
}

pub const DEFAULT_HOST: Strng = strng::literal!("api.mistral.ai");
pub const CHAT_PATH: &str = "/v1/chat/completions";

impl Provider {
	pub fn host(&self) -> Strng {
		self.host_override.clone().unwrap_or(DEFAULT_HOST)
	}
}
