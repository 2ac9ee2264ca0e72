//! Integration tests: composition sessions.
//!
//! Covers the end-to-end properties of compose():
//! - override order is monotonic (later sources win)
//! - unknown override names are dropped without error
//! - computed overrides are lazy, with and without memoization
//! - composition leaves the originally imported module untouched
//! - statics are recomputed from merged values
//! - sweep-driven sources advance exactly once per composition

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use strata::{ComposeError, ModuleDef, Registry};
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

/// A registry with a `weather` module mirroring a typical experiment setup:
/// plain defaults plus a derived static attribute.
fn weather_registry() -> Registry {
    let registry = Registry::new();
    registry.register(
        ModuleDef::new("weather", |ns, _| {
            ns.set("BATCH_SIZE", json!(64));
            ns.set("LEARNING_RATE", json!(1e-4));
            ns.set("TODAYS_TEMP_FEATURE", json!(true));
            ns.set("AVERAGE_TEMP_FEATURE", json!(true));
        })
        .with_statics(|module| {
            let todays = module.get_bool("TODAYS_TEMP_FEATURE").unwrap_or(false) as i64;
            let average = module.get_bool("AVERAGE_TEMP_FEATURE").unwrap_or(false) as i64;
            Ok(vec![("NUM_FEATURES".to_string(), json!(todays + average))])
        }),
    );
    registry
}

// === Override ordering ===

#[test]
fn test_later_source_wins() {
    let dir = TempDir::new().unwrap();
    let first = write_config(&dir, "first.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 128\n");
    let second = write_config(&dir, "second.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 256\n");

    let registry = weather_registry();
    let module = registry.compose("weather", &[first, second]).unwrap();

    assert_eq!(module.get_u64("BATCH_SIZE"), Some(256));
    // A name only the first source sets still applies.
    assert_eq!(module.get_f64("LEARNING_RATE"), Some(1e-4));
}

#[test]
fn test_overrides_win_over_defaults() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "config.cfg",
        "MODULE = \"weather\"\nTODAYS_TEMP_FEATURE = false\n",
    );

    let registry = weather_registry();
    let module = registry.compose("weather", &[config]).unwrap();

    assert_eq!(module.get_bool("TODAYS_TEMP_FEATURE"), Some(false));
}

// === Unknown names ===

#[test]
fn test_unknown_override_names_dropped() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "config.cfg",
        "MODULE = \"weather\"\nUNDEFINED_XYZ = 123\nBATCH_SIZE = 128\n",
    );

    let registry = weather_registry();
    let module = registry.compose("weather", &[config]).unwrap();

    assert_eq!(module.get_u64("BATCH_SIZE"), Some(128));
    assert!(module.get("UNDEFINED_XYZ").is_err());
}

#[test]
fn test_round_trip_with_non_intersecting_source() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "config.cfg",
        "MODULE = \"weather\"\nAXIS_SCRATCH = [1, 2, 3]\n",
    );

    // No statics here so the composed namespace can be compared directly
    // against the unmodified defaults.
    let registry = Registry::new();
    registry.register(ModuleDef::new("weather", |ns, _| {
        ns.set("BATCH_SIZE", json!(64));
        ns.set("LEARNING_RATE", json!(1e-4));
    }));

    let module = registry.compose("weather", &[config]).unwrap();

    let mut expected = strata::Namespace::new("weather");
    expected.set("BATCH_SIZE", json!(64));
    expected.set("LEARNING_RATE", json!(1e-4));
    assert!(module.snapshot().attribute_equal(&expected));
}

// === Computed overrides ===

#[test]
fn test_computed_override_recomputes_per_access() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "property.cfg",
        "MODULE = \"weather\"\n\
         TODAYS_TEMP_FEATURE = false\n\
         computed AVERAGE_TEMP_FEATURE = TODAYS_TEMP_FEATURE\n",
    );

    let registry = weather_registry();
    let module = registry.compose("weather", &[config]).unwrap();

    assert_eq!(module.get_bool("TODAYS_TEMP_FEATURE"), Some(false));
    assert_eq!(module.get_bool("AVERAGE_TEMP_FEATURE"), Some(false));

    // The dependency changes, and the computed attribute follows.
    module.set("TODAYS_TEMP_FEATURE", json!(true));
    assert_eq!(module.get_bool("AVERAGE_TEMP_FEATURE"), Some(true));
}

#[test]
fn test_cached_override_keeps_first_value() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "cached.cfg",
        "MODULE = \"weather\"\n\
         TODAYS_TEMP_FEATURE = false\n\
         cached AVERAGE_TEMP_FEATURE = TODAYS_TEMP_FEATURE\n",
    );

    let registry = weather_registry();
    let module = registry.compose("weather", &[config]).unwrap();

    assert_eq!(module.get_bool("AVERAGE_TEMP_FEATURE"), Some(false));

    // The dependency changes, but the memoized value stays.
    module.set("TODAYS_TEMP_FEATURE", json!(true));
    assert_eq!(module.get_bool("AVERAGE_TEMP_FEATURE"), Some(false));
    assert_eq!(module.get_bool("TODAYS_TEMP_FEATURE"), Some(true));
}

#[test]
fn test_plain_override_replaces_computed() {
    let dir = TempDir::new().unwrap();
    let first = write_config(
        &dir,
        "first.cfg",
        "MODULE = \"weather\"\ncomputed BATCH_SIZE = LEARNING_RATE\n",
    );
    let second = write_config(&dir, "second.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 512\n");

    let registry = weather_registry();
    let module = registry.compose("weather", &[first, second]).unwrap();

    assert_eq!(module.get_u64("BATCH_SIZE"), Some(512));
    assert!(module.computed().is_empty());
}

// === Isolation ===

#[test]
fn test_composition_leaves_original_module_unchanged() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "config.cfg",
        "MODULE = \"weather\"\nTODAYS_TEMP_FEATURE = false\n",
    );

    let registry = weather_registry();
    let original = registry.import("weather").unwrap();
    assert_eq!(original.get_bool("TODAYS_TEMP_FEATURE"), Some(true));

    let composed = registry.compose("weather", &[config]).unwrap();

    assert_eq!(composed.get_bool("TODAYS_TEMP_FEATURE"), Some(false));
    assert_eq!(original.get_bool("TODAYS_TEMP_FEATURE"), Some(true));

    // The cache still serves the original build.
    let cached = registry.cached("weather").unwrap();
    assert!(Arc::ptr_eq(&original, &cached));
}

#[test]
fn test_mismatched_source_skipped_entirely() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "other.cfg",
        "MODULE = \"climate\"\nBATCH_SIZE = 999\n",
    );

    let registry = weather_registry();
    let module = registry.compose("weather", &[config]).unwrap();

    assert_eq!(module.get_u64("BATCH_SIZE"), Some(64), "no partial application");
    assert!(module.sources().is_empty());
}

// === Statics ===

#[test]
fn test_statics_recomputed_from_merged_values() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "config.cfg",
        "MODULE = \"weather\"\nTODAYS_TEMP_FEATURE = false\n",
    );

    let registry = weather_registry();
    let original = registry.import("weather").unwrap();
    assert_eq!(original.get_i64("NUM_FEATURES"), Some(2));

    let composed = registry.compose("weather", &[config]).unwrap();
    assert_eq!(composed.get_i64("NUM_FEATURES"), Some(1));
    assert_eq!(original.get_i64("NUM_FEATURES"), Some(2));
}

// === Provenance ===

#[test]
fn test_sources_recorded_in_order() {
    let dir = TempDir::new().unwrap();
    let first = write_config(&dir, "first.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 128\n");
    let second = write_config(&dir, "second.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 256\n");

    let registry = weather_registry();
    let module = registry
        .compose("weather", &[first.clone(), second.clone()])
        .unwrap();

    let sources = module.sources();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].path, first.to_string_lossy());
    assert_eq!(sources[1].path, second.to_string_lossy());
    assert_eq!(sources[0].digest.len(), 64);
    assert_ne!(sources[0].digest, sources[1].digest);
}

// === Sweep-driven sources ===

#[test]
fn test_sweep_source_advances_once_per_compose() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "grid.cfg",
        "MODULE = \"weather\"\n\
         LEARNING_RATE, BATCH_SIZE, AVERAGE_TEMP_FEATURE = sweep(\"grid.progress\", [1e-5, 1e-4, 1e-3], [64, 128, 256], [true, false])\n",
    );

    let registry = weather_registry();

    let first = registry.compose("weather", &[config.clone()]).unwrap();
    assert_eq!(first.get_f64("LEARNING_RATE"), Some(1e-5));
    assert_eq!(first.get_u64("BATCH_SIZE"), Some(64));
    assert_eq!(first.get_bool("AVERAGE_TEMP_FEATURE"), Some(true));

    let second = registry.compose("weather", &[config.clone()]).unwrap();
    assert_eq!(second.get_f64("LEARNING_RATE"), Some(1e-5));
    assert_eq!(second.get_u64("BATCH_SIZE"), Some(64));
    assert_eq!(second.get_bool("AVERAGE_TEMP_FEATURE"), Some(false));

    let third = registry.compose("weather", &[config]).unwrap();
    assert_eq!(third.get_f64("LEARNING_RATE"), Some(1e-5));
    assert_eq!(third.get_u64("BATCH_SIZE"), Some(128));
    assert_eq!(third.get_bool("AVERAGE_TEMP_FEATURE"), Some(true));
}

// === Failure semantics ===

#[test]
fn test_missing_source_aborts_compose() {
    let registry = weather_registry();
    let result = registry.compose("weather", &[PathBuf::from("/no/such/file.cfg")]);
    assert!(matches!(
        result,
        Err(ComposeError::Load(strata::LoadError::SourceNotFound(_)))
    ));
}

#[test]
fn test_compose_usable_after_error() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "config.cfg", "MODULE = \"weather\"\nBATCH_SIZE = 128\n");

    let registry = weather_registry();
    assert!(registry.compose("weather", &[]).is_err());
    assert!(registry
        .compose("weather", &[PathBuf::from("/no/such/file.cfg")])
        .is_err());

    // Errors released the composition flag and restored all state.
    let module = registry.compose("weather", &[config]).unwrap();
    assert_eq!(module.get_u64("BATCH_SIZE"), Some(128));
}
