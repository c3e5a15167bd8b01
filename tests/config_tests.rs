//! Integration tests for environment-driven configuration loading.
//!
//! These tests mutate process environment variables, so they run serially.

use mssql_entra_mcp_server::{AuthMethod, DbConfig, ServerError};
use serial_test::serial;

const ALL_VARS: &[&str] = &[
    "MSSQL_SERVER",
    "MSSQL_DATABASE",
    "MSSQL_AUTH_METHOD",
    "MSSQL_USER",
    "MSSQL_PASSWORD",
    "MSSQL_CLIENT_ID",
    "MSSQL_CLIENT_SECRET",
    "MSSQL_TENANT_ID",
    "MSSQL_CONNECTION_TIMEOUT",
    "MSSQL_ENCRYPT",
    "MSSQL_TRUST_SERVER_CERTIFICATE",
];

fn with_env(vars: &[(&str, &str)], f: impl FnOnce()) {
    for name in ALL_VARS {
        std::env::remove_var(name);
    }
    for (name, value) in vars {
        std::env::set_var(name, value);
    }
    f();
    for name in ALL_VARS {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn loads_sql_auth_with_defaults() {
    with_env(
        &[
            ("MSSQL_SERVER", "db1"),
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_USER", "alice"),
            ("MSSQL_PASSWORD", "pw"),
        ],
        || {
            let config = DbConfig::from_env().unwrap();
            assert_eq!(config.server, "db1");
            assert_eq!(config.database, "sales");
            assert_eq!(config.auth_method, AuthMethod::Sql);
            assert_eq!(config.user.as_deref(), Some("alice"));
            assert_eq!(config.connection_timeout, 30);
            assert!(config.encrypt);
            assert!(!config.trust_server_certificate);
        },
    );
}

#[test]
#[serial]
fn missing_server_is_an_error() {
    with_env(&[("MSSQL_DATABASE", "sales")], || {
        let err = DbConfig::from_env().unwrap_err();
        assert!(matches!(err, ServerError::MissingConfig(_)));
        assert!(err.to_string().contains("MSSQL_SERVER"));
    });
}

#[test]
#[serial]
fn sql_auth_without_credentials_is_an_error() {
    with_env(
        &[("MSSQL_SERVER", "db1"), ("MSSQL_DATABASE", "sales")],
        || {
            let err = DbConfig::from_env().unwrap_err();
            assert!(matches!(err, ServerError::MissingConfig(_)));
        },
    );
}

#[test]
#[serial]
fn unknown_auth_method_is_rejected() {
    with_env(
        &[
            ("MSSQL_SERVER", "db1"),
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_AUTH_METHOD", "kerberos"),
        ],
        || {
            let err = DbConfig::from_env().unwrap_err();
            assert!(matches!(err, ServerError::UnsupportedAuthMethod(_)));
        },
    );
}

#[test]
#[serial]
fn loads_service_principal_auth() {
    with_env(
        &[
            ("MSSQL_SERVER", "srv.database.windows.net"),
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_AUTH_METHOD", "entra_service_principal"),
            ("MSSQL_CLIENT_ID", "app-id"),
            ("MSSQL_CLIENT_SECRET", "secret"),
            ("MSSQL_TENANT_ID", "tenant"),
        ],
        || {
            let config = DbConfig::from_env().unwrap();
            assert_eq!(config.auth_method, AuthMethod::EntraServicePrincipal);
            assert_eq!(config.client_id.as_deref(), Some("app-id"));
            assert_eq!(config.tenant_id.as_deref(), Some("tenant"));
        },
    );
}

#[test]
#[serial]
fn service_principal_without_secret_is_an_error() {
    with_env(
        &[
            ("MSSQL_SERVER", "srv"),
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_AUTH_METHOD", "entra_service_principal"),
            ("MSSQL_CLIENT_ID", "app-id"),
        ],
        || {
            let err = DbConfig::from_env().unwrap_err();
            assert!(matches!(err, ServerError::MissingConfig(_)));
        },
    );
}

#[test]
#[serial]
fn interactive_auth_needs_no_credentials() {
    with_env(
        &[
            ("MSSQL_SERVER", "srv.database.windows.net"),
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_AUTH_METHOD", "entra_interactive"),
        ],
        || {
            let config = DbConfig::from_env().unwrap();
            assert_eq!(config.auth_method, AuthMethod::EntraInteractive);
            assert!(config.user.is_none());
        },
    );
}

#[test]
#[serial]
fn parses_timeout_and_tls_overrides() {
    with_env(
        &[
            ("MSSQL_SERVER", "db1,14330"),
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_USER", "alice"),
            ("MSSQL_PASSWORD", "pw"),
            ("MSSQL_CONNECTION_TIMEOUT", "5"),
            ("MSSQL_ENCRYPT", "no"),
            ("MSSQL_TRUST_SERVER_CERTIFICATE", "yes"),
        ],
        || {
            let config = DbConfig::from_env().unwrap();
            assert_eq!(config.connection_timeout, 5);
            assert!(!config.encrypt);
            assert!(config.trust_server_certificate);
            assert_eq!(config.host_and_port(), ("db1", 14330));
        },
    );
}

#[test]
#[serial]
fn blank_optional_values_are_treated_as_absent() {
    with_env(
        &[
            ("MSSQL_SERVER", "db1"),
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_USER", "  "),
            ("MSSQL_PASSWORD", "pw"),
        ],
        || {
            let err = DbConfig::from_env().unwrap_err();
            assert!(matches!(err, ServerError::MissingConfig(_)));
        },
    );
}
