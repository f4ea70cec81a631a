//! Definition authoring: the YAML DTO, its parser and graph validation.

pub mod dto;
pub mod validate;
pub mod yaml;

pub use dto::{EdgeDto, GatewayDirection, NodeDto, ProcessDefinitionDto};
pub use validate::{validate_dto, ValidationError};
pub use yaml::parse_definition_yaml;
