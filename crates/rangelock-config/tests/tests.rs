// Integration-test harness for rangelock-config.
//
// Cargo builds one test binary per `tests/*.rs` file; everything lives under
// `suite/` so there is only one.

mod suite;
