//! Network clients used by the MCP tools.
pub mod dimse;
pub mod fhir;
pub mod pdf;
pub mod ris;
