//! Registration of configurable implementations.

/// Ties an implementation's config name to its factory.
///
/// Each implementation module (`batch_delivery::implementations::simulated`,
/// `batch_account::implementations::local`, ...) exposes a `Registry` unit struct
/// implementing this trait. The service collects all registries into name-keyed
/// factory maps, and `primary = "<NAME>"` in the config selects one.
pub trait ImplementationRegistry {
	/// Key under `[<section>.implementations]`, e.g. `"simulated"` or `"local"`.
	const NAME: &'static str;

	/// Factory function type of the capability this implementation provides.
	type Factory;

	fn factory() -> Self::Factory;
}
