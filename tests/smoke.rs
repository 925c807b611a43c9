//! Basic smoke test to verify the public surface is exported.

#[test]
fn crate_compiles() {
    // If this test runs, the crate skeleton is valid.
    let _ = std::any::type_name::<keyledger::LedgerConfig>();
    let _ = std::any::type_name::<keyledger::LedgerError>();
    let _ = std::any::type_name::<keyledger::LedgerManager>();
}

#[test]
fn default_config_is_valid() {
    keyledger::LedgerConfig::default().validate().unwrap();
}
