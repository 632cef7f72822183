//! ABI decoding of the four holon events using `alloy-dyn-abi`.
//!
//! All parameters of these events are non-indexed, so the whole payload
//! sits in the log data and decodes as one parameter tuple.

use std::collections::BTreeMap;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, B256};

use holonindex_core::entity::TemplateKind;
use holonindex_core::error::IndexerError;
use holonindex_core::event::{EventKind, EventRecord, ParamValue};
use holonindex_core::types::{BlockSummary, RawLog};
use holonindex_core::EventDecoder;

/// One event of a template's ABI.
#[derive(Debug, Clone)]
pub struct EventSchema {
    pub kind: EventKind,
    pub template: TemplateKind,
    /// Canonical signature, e.g. `NewHolon(string,address)`.
    pub signature: String,
    pub topic0: B256,
    params: Vec<(&'static str, DynSolType)>,
}

impl EventSchema {
    fn new(kind: EventKind, template: TemplateKind, params: Vec<(&'static str, DynSolType)>) -> Self {
        let types: Vec<String> = params.iter().map(|(_, ty)| ty.sol_type_name().into_owned()).collect();
        let signature = format!("{}({})", kind.name(), types.join(","));
        let topic0 = keccak256(signature.as_bytes());
        Self {
            kind,
            template,
            signature,
            topic0,
            params,
        }
    }

    pub fn param_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().map(|(name, _)| *name)
    }

    fn decode_params(&self, data: &[u8]) -> Result<BTreeMap<String, ParamValue>, IndexerError> {
        let types: Vec<DynSolType> = self.params.iter().map(|(_, ty)| ty.clone()).collect();
        let decoded = DynSolType::Tuple(types)
            .abi_decode_params(data)
            .map_err(|e| IndexerError::Decode(format!("{}: {e}", self.signature)))?;

        let values = match decoded {
            DynSolValue::Tuple(vals) => vals,
            other => {
                return Err(IndexerError::Decode(format!(
                    "{}: expected tuple, got {other:?}",
                    self.signature
                )))
            }
        };
        if values.len() != self.params.len() {
            return Err(IndexerError::Decode(format!(
                "{}: expected {} params, got {}",
                self.signature,
                self.params.len(),
                values.len()
            )));
        }

        let mut params = BTreeMap::new();
        for ((name, _), value) in self.params.iter().zip(values) {
            params.insert((*name).to_string(), normalize(value, &self.signature)?);
        }
        Ok(params)
    }
}

fn normalize(value: DynSolValue, signature: &str) -> Result<ParamValue, IndexerError> {
    match value {
        DynSolValue::Address(a) => Ok(ParamValue::Address(a)),
        DynSolValue::Uint(u, _) => Ok(ParamValue::Uint(u)),
        DynSolValue::Bool(b) => Ok(ParamValue::Bool(b)),
        DynSolValue::String(s) => Ok(ParamValue::Str(s)),
        DynSolValue::Bytes(b) => Ok(ParamValue::Bytes(b)),
        DynSolValue::FixedBytes(word, size) => Ok(ParamValue::Bytes(word[..size].to_vec())),
        other => Err(IndexerError::Decode(format!("{signature}: unsupported value {other:?}"))),
    }
}

/// Decodes holon factory and holon logs into [`EventRecord`]s.
#[derive(Debug, Clone)]
pub struct AbiEventDecoder {
    schemas: Vec<EventSchema>,
}

impl AbiEventDecoder {
    pub fn new() -> Self {
        use DynSolType::{Address, Bool, String, Uint};
        let schemas = vec![
            EventSchema::new(
                EventKind::NewFlavor,
                TemplateKind::HolonFactory,
                vec![("flavor", Address), ("name", String)],
            ),
            EventSchema::new(
                EventKind::NewHolon,
                TemplateKind::HolonFactory,
                vec![("name", String), ("addr", Address)],
            ),
            EventSchema::new(
                EventKind::RewardDistributed,
                TemplateKind::ManagedHolon,
                vec![
                    ("contractAddress", Address),
                    ("amount", Uint(256)),
                    ("totalMembers", Uint(256)),
                    ("rewardType", String),
                ],
            ),
            EventSchema::new(
                EventKind::MemberRewarded,
                TemplateKind::ManagedHolon,
                vec![
                    ("from", Address),
                    ("to", Address),
                    ("amount", Uint(256)),
                    ("isContract", Bool),
                    ("rewardType", String),
                ],
            ),
        ];
        Self { schemas }
    }

    pub fn schemas(&self) -> &[EventSchema] {
        &self.schemas
    }

    pub fn schema(&self, kind: EventKind) -> Option<&EventSchema> {
        self.schemas.iter().find(|s| s.kind == kind)
    }

    /// topic0 of every known event, for `eth_getLogs` filtering.
    pub fn topics(&self) -> Vec<B256> {
        self.schemas.iter().map(|s| s.topic0).collect()
    }
}

impl Default for AbiEventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for AbiEventDecoder {
    fn decode(
        &self,
        log: &RawLog,
        block: &BlockSummary,
        template: TemplateKind,
    ) -> Result<Option<EventRecord>, IndexerError> {
        let Some(topic0) = log.topic0() else {
            return Ok(None);
        };
        let Some(schema) = self
            .schemas
            .iter()
            .find(|s| s.template == template && s.topic0 == *topic0)
        else {
            return Ok(None);
        };

        let params = schema.decode_params(&log.data)?;
        Ok(Some(EventRecord {
            name: schema.kind.name().to_string(),
            source_address: log.address,
            params,
            block_number: block.number,
            block_timestamp: block.timestamp,
            transaction_hash: log.tx_hash,
            log_index: log.log_index,
            transaction_from: log.tx_from,
            transaction_to: log.tx_to,
        }))
    }
}
