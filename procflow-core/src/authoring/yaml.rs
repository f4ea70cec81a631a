use super::dto::ProcessDefinitionDto;
use anyhow::Result;

/// Parse a YAML string into a ProcessDefinitionDto.
///
/// Validation is NOT performed here. `DefinitionRegistry::register` validates
/// before building the executable definition.
pub fn parse_definition_yaml(yaml_str: &str) -> Result<ProcessDefinitionDto> {
    let dto: ProcessDefinitionDto = serde_yaml::from_str(yaml_str)?;
    Ok(dto)
}
