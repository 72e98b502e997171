// ── Description caches ──
//
// Append/merge registries for controller-advertised capability records,
// with JSON persistence.

mod descriptions;

pub use descriptions::{DeviceDescriptionCache, ParamsetDescriptionCache};
