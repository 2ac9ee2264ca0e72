//! Merge engine.
//!
//! Folds loaded sources onto a target's defaults namespace and computed
//! registry, attribute by attribute. Replacement is always whole-attribute;
//! values are never merged structurally. Sources apply in caller order, so
//! later sources win for a repeated name and every override wins over the
//! original default.

use crate::loader::{Source, SourceBinding};
use crate::namespace::{ComputedRegistry, Namespace};

/// Attribute names reserved for source metadata. Never merged.
pub const RESERVED_NAMES: &[&str] = &["MODULE"];

/// Apply one source's bindings onto `defaults` and `registry` in place.
///
/// Per binding name:
/// - known plain attribute, computed override: register the computed
///   attribute and remove the plain one, so lookup falls through to the
///   registry;
/// - known plain attribute, plain override: replace the value;
/// - registered computed attribute, computed override: replace the
///   registration;
/// - registered computed attribute, plain override: drop the registration,
///   the plain value wins;
/// - name unknown to both: silently dropped. Override files may declare
///   scratch variables (sweep axes) the target never defines.
pub fn apply_source(defaults: &mut Namespace, registry: &mut ComputedRegistry, source: &Source) {
    for (name, binding) in source.bindings() {
        if RESERVED_NAMES.contains(&name.as_str()) {
            continue;
        }
        match binding {
            SourceBinding::Computed(attr) => {
                if defaults.contains(name) {
                    defaults.remove(name);
                    registry.insert(name.clone(), attr.clone());
                } else if registry.contains(name) {
                    registry.insert(name.clone(), attr.clone());
                }
            }
            SourceBinding::Plain(value) => {
                if defaults.contains(name) {
                    defaults.set(name.clone(), value.clone());
                } else if registry.contains(name) {
                    registry.remove(name);
                    defaults.set(name.clone(), value.clone());
                }
            }
        }
    }
}

/// Apply sources in order; later sources win for a repeated name.
pub fn apply_sources<'a>(
    defaults: &mut Namespace,
    registry: &mut ComputedRegistry,
    sources: impl IntoIterator<Item = &'a Source>,
) {
    for source in sources {
        apply_source(defaults, registry, source);
    }
}
