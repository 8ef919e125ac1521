//! Interface descriptors: a header plus `id=function` method lines

use super::{expect_final_section, parse_info, DescriptorInfo, DescriptorKind, Version};
use crate::common::{eat_char, eat_line_end, parse_name_also_accept, Cursor, Expected};
use crate::error::{fail, DfiError, DfiResult};
use crate::function::DynFunction;
use crate::types::TypeTable;
use serde_json::{json, Value};
use std::io::Read;

pub const METHODS_SECTION: &str = "methods";

/// Characters allowed in a method id beyond the name characters
const METHOD_ID_EXTRA: &str = "(){}[];*.<> #";

/// One service method
#[derive(Debug, Clone)]
pub struct Method {
    /// Position in the service function table
    pub index: usize,
    /// Caller-facing signature, e.g. `add(DD)D`
    pub id: String,
    pub function: DynFunction,
}

impl Method {
    pub fn name(&self) -> &str {
        self.function.name()
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    info: DescriptorInfo,
    methods: Vec<Method>,
}

impl InterfaceDescriptor {
    pub fn parse(text: &str) -> DfiResult<Self> {
        let mut cursor = Cursor::new(text);
        let (info, section) = parse_info(&mut cursor, DescriptorKind::Interface)?;
        expect_final_section(&section, DescriptorKind::Interface)?;

        let methods = parse_methods(&mut cursor, info.types())
            .map_err(|e| DfiError::in_section(METHODS_SECTION, e))?;

        tracing::debug!(
            name = info.name(),
            version = %info.version(),
            methods = methods.len(),
            "parsed interface descriptor"
        );
        Ok(Self { info, methods })
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

    /// Methods in declaration order
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method(&self, id: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.id == id)
    }

    pub fn summary_json(&self) -> Value {
        let mut summary = self.info.summary(DescriptorKind::Interface);
        summary["methods"] = self
            .methods
            .iter()
            .map(|method| {
                json!({
                    "id": method.id,
                    "name": method.name(),
                    "arguments": method.function.argument_count(),
                    "descriptor": method.function.to_string(),
                })
            })
            .collect();
        summary
    }
}

fn parse_methods(cursor: &mut Cursor<'_>, types: &TypeTable) -> DfiResult<Vec<Method>> {
    let mut methods: Vec<Method> = Vec::new();
    while !cursor.is_eof() {
        let id = parse_name_also_accept(cursor, METHOD_ID_EXTRA)?;
        if methods.iter().any(|method| method.id == id) {
            return fail(DfiError::Duplicate { what: "method", name: id });
        }
        eat_char(cursor, Expected::Char('='))?;
        let function = DynFunction::parse_cursor(cursor, Some(types))?;
        eat_line_end(cursor)?;

        let id_name = id.split('(').next().unwrap_or_default();
        if id_name != function.name() {
            return fail(DfiError::semantic(format!(
                "Method id '{}' does not match function name '{}'",
                id,
                function.name()
            )));
        }
        methods.push(Method {
            index: methods.len(),
            id,
            function,
        });
    }
    Ok(methods)
}
