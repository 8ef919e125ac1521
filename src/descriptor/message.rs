//! Message descriptors: a header plus one message type

use super::{expect_final_section, parse_info, DescriptorInfo, DescriptorKind, Version};
use crate::common::{eat_char, eat_line_end, Cursor, Expected};
use crate::error::{fail, DfiError, DfiResult};
use crate::types::{parse_type_cursor, DynType, TypeTable};
use serde_json::Value;
use std::io::Read;

pub const MESSAGE_SECTION: &str = "message";

/// Header key overriding the derived message id
pub const MSG_ID_KEY: &str = "msgId";

#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    info: DescriptorInfo,
    message_type: DynType,
    id: u32,
}

impl MessageDescriptor {
    pub fn parse(text: &str) -> DfiResult<Self> {
        let mut cursor = Cursor::new(text);
        let (info, section) = parse_info(&mut cursor, DescriptorKind::Message)?;
        expect_final_section(&section, DescriptorKind::Message)?;

        let message_type = parse_message_section(&mut cursor, info.name(), info.types())
            .map_err(|e| DfiError::in_section(MESSAGE_SECTION, e))?;
        let id = match info.header(MSG_ID_KEY) {
            Some(value) => match value.parse::<u32>() {
                Ok(id) => id,
                Err(_) => {
                    return fail(DfiError::semantic(format!(
                        "Invalid {} '{}'",
                        MSG_ID_KEY, value
                    )))
                }
            },
            None => name_hash(info.name()),
        };

        tracing::debug!(name = info.name(), version = %info.version(), id, "parsed message descriptor");
        Ok(Self {
            info,
            message_type,
            id,
        })
    }

    pub fn parse_reader<R: Read>(mut reader: R) -> DfiResult<Self> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| DfiError::from(e).recorded())?;
        Self::parse(&text)
    }

    pub fn info(&self) -> &DescriptorInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn version(&self) -> &Version {
        self.info.version()
    }

    pub fn message_type(&self) -> &DynType {
        &self.message_type
    }

    /// `msgId` header when present, otherwise a stable hash of the name
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn summary_json(&self) -> Value {
        let mut summary = self.info.summary(DescriptorKind::Message);
        summary["id"] = Value::from(self.id);
        summary["message"] = Value::String(self.message_type.to_string());
        summary
    }
}

fn parse_message_section(cursor: &mut Cursor<'_>, name: &str, types: &TypeTable) -> DfiResult<DynType> {
    let ty = parse_type_cursor(cursor, Some(name), Some(types))?;
    eat_line_end(cursor)?;
    eat_char(cursor, Expected::Eof)?;
    Ok(ty)
}

/// djb2 over the UTF-8 bytes of the name
fn name_hash(name: &str) -> u32 {
    name.bytes()
        .fold(5381u32, |hash, byte| hash.wrapping_mul(33).wrapping_add(byte as u32))
}
