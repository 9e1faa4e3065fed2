//! Unit tests for the `ephemera` CLI binary implementation.

use std::io::Write as _;

use rstest::rstest;

use super::*;

fn parse(args: &[&str]) -> ProvisionCommand {
    let argv = std::iter::once("ephemera")
        .chain(std::iter::once("provision"))
        .chain(args.iter().copied());
    match Cli::try_parse_from(argv).expect("arguments parse") {
        Cli::Provision(command) => command,
        other => panic!("expected provision, got {other:?}"),
    }
}

fn request_file(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "ephemera-request-{}.json",
        uuid::Uuid::new_v4().simple()
    ));
    let mut file = std::fs::File::create(&path).expect("create request file");
    file.write_all(contents.as_bytes()).expect("write request file");
    path
}

#[test]
fn flags_build_a_request() {
    let request = build_request(parse(&[
        "--accept-eula",
        "--kind",
        "paper",
        "--game-version",
        "1.21.1",
        "--seed",
        "-42",
        "--plugin-url",
        "https://example.com/a.jar",
        "--plugin-url",
        "https://example.com/b.jar",
        "--no-pvp",
    ]))
    .expect("valid request");

    assert!(request.eula_accepted);
    assert_eq!(request.kind, Some(WorkloadKind::Paper));
    assert_eq!(request.version.as_deref(), Some("1.21.1"));
    assert_eq!(request.seed.as_deref(), Some("-42"));
    assert_eq!(request.plugin_urls.len(), 2);
    assert!(!request.pvp);
    assert!(request.online_mode);
}

#[test]
fn flags_override_request_file() {
    let path = request_file(r#"{"eula": true, "kind": "FABRIC", "motd": "from file", "max_players": 4}"#);
    let path_arg = path.to_string_lossy().into_owned();

    let request = build_request(parse(&["--request", &path_arg, "--motd", "from flag"]))
        .expect("valid request");
    std::fs::remove_file(&path).ok();

    assert!(request.eula_accepted, "file acceptance is honoured");
    assert_eq!(request.kind, Some(WorkloadKind::Fabric));
    assert_eq!(request.motd.as_deref(), Some("from flag"));
    assert_eq!(request.max_players, Some(4));
}

#[rstest]
#[case(&["--kind", "bukkit"])]
#[case(&["--request", "/nonexistent/ephemera-request.json"])]
fn invalid_requests_are_rejected(#[case] args: &[&str]) {
    let err = build_request(parse(args)).expect_err("request should be rejected");
    assert!(matches!(err, CliError::Request(_)));
}

#[tokio::test]
async fn provision_without_eula_fails_before_loading_config() {
    let err = provision(parse(&[])).await.expect_err("EULA gate");

    assert!(matches!(
        err,
        CliError::Provision {
            kind: FailureKind::LicenseNotAccepted,
            ..
        }
    ));
    assert!(err.to_string().contains("EULA"));
}

#[test]
fn write_error_writes_cli_error() {
    let mut buffer = Vec::new();
    write_error(&mut buffer, &CliError::NotFound(String::from("srv-1")));

    assert_eq!(
        String::from_utf8(buffer).expect("utf8"),
        "instance srv-1 not found\n"
    );
}
