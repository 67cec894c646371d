//! Reserved property and exec-parameter identifiers.

/// Registrar reference handed to a launched component.
pub const NAMING_CONTEXT_IOR: &str = "NAMING_CONTEXT_IOR";
/// Composite identifier of the launched component.
pub const COMPONENT_IDENTIFIER: &str = "COMPONENT_IDENTIFIER";
/// Name the component binds under in the waveform context.
pub const NAME_BINDING: &str = "NAME_BINDING";
/// Path of the waveform's base naming context.
pub const DOM_PATH: &str = "DOM_PATH";
/// Path of the component's software package descriptor.
pub const PROFILE_NAME: &str = "PROFILE_NAME";
/// Logging configuration handed down from the domain.
pub const LOGGING_CONFIG_URI: &str = "LOGGING_CONFIG_URI";
/// Init-configuration key extracted before overrides are applied.
pub const TRUSTED_APPLICATION: &str = "TRUSTED_APPLICATION";

/// Marker opening a rewritten allocation property expression.
pub const MATH_MARKER: &str = "__MATH__";
