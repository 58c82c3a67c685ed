//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable module (storage, account, chain client) provides a
/// `Registry` struct implementing this trait, declaring the name used under
/// `<section>.implementations.<name>` in the configuration and the factory
/// that builds it.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// for example `"memory"` or `"evm_alloy"`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
