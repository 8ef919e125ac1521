//! Integration tests for the dfi CLI driver

use clap::Parser;
use dfi::cli::{Cli, CliContext, Commands, DfiDriver};
use dfi::config::DfiConfig;
use std::fs;
use tempfile::TempDir;

const CALCULATOR: &str = "\
:header
type=interface
name=calculator
version=1.0.0
:types
point={DD x y}
:methods
add(DD)D=add(#am=handle;PDD#am=pre;*D)N
";

fn quiet_driver(config: DfiConfig) -> DfiDriver {
    DfiDriver::new(CliContext::new(false, true), config)
}

#[test]
fn test_cli_context() {
    let context = CliContext::new(true, false);
    context.verbose("This is a verbose message");
    context.info("This is an info message");
    context.warn("This is a warning message");
    assert!(context.elapsed().as_secs() < 60);
}

#[test]
fn test_parse_arguments() {
    let cli = Cli::parse_from(["dfi", "--verbose", "type", "{II a b}", "--layout"]);
    assert!(cli.verbose);
    match cli.command {
        Commands::Type { descriptor, layout, .. } => {
            assert_eq!(descriptor, "{II a b}");
            assert!(layout);
        }
        _ => panic!("expected type command"),
    }
}

#[test]
fn test_inspect_with_search_path() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("calculator.descriptor"), CALCULATOR).unwrap();
    let mut config = DfiConfig::default();
    config.descriptors.search_paths.push(dir.path().to_path_buf());

    let driver = quiet_driver(config);
    let report = driver
        .execute(&Commands::Inspect {
            file: "calculator.descriptor".into(),
            json: false,
        })
        .unwrap();
    assert!(report.starts_with("interface calculator version<1.0.0>"));
    assert!(report.contains("method add(DD)D = add(#am=handle;PDD#am=pre;*D)N"));
}

#[test]
fn test_type_with_reference_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calculator.descriptor");
    fs::write(&path, CALCULATOR).unwrap();

    let driver = quiet_driver(DfiConfig::default());
    let report = driver
        .execute(&Commands::Type {
            descriptor: "[lpoint;".to_string(),
            name: None,
            types: Some(path.clone()),
            layout: true,
        })
        .unwrap();
    assert!(report.contains("size=16"));

    let json = driver
        .execute(&Commands::Json {
            descriptor: "lpoint;".to_string(),
            value: Some(r#"{"x":1,"y":2}"#.to_string()),
            file: None,
            types: Some(path),
            pretty: false,
        })
        .unwrap();
    assert_eq!(json, r#"{"x":1.0,"y":2.0}"#);
}

#[test]
fn test_json_requires_input() {
    let driver = quiet_driver(DfiConfig::default());
    assert!(driver
        .execute(&Commands::Json {
            descriptor: "I".to_string(),
            value: None,
            file: None,
            types: None,
            pretty: false,
        })
        .is_err());
}
