//! Property-based tests for the connection descriptor
//!
//! Rendering a descriptor and parsing it back must give the same descriptor,
//! and the driver options must agree with the rendered string.

use pgtest::ConnectionConfig;
use proptest::prelude::*;
use sqlx::postgres::PgSslMode;

fn descriptor() -> impl Strategy<Value = ConnectionConfig> {
    (
        "[a-z][a-z0-9_]{0,15}",
        "[A-Za-z0-9]{1,24}",
        "[a-z][a-z0-9_]{0,15}",
        "[a-z][a-z0-9-]{0,20}",
        1u16..=u16::MAX,
        any::<bool>(),
    )
        .prop_map(|(user, password, database, host, port, ssl)| {
            ConnectionConfig::new(user, password, database)
                .with_host_port(format!("{host}:{port}"))
                .with_ssl_mode_enabled(ssl)
        })
}

// ============================================================================
// Round Trip
// ============================================================================

mod round_trip_tests {
    use super::*;

    proptest! {
        #[test]
        fn rendered_string_parses_back(config in descriptor()) {
            let rendered = config.format_dsn();
            let parsed: ConnectionConfig = rendered.parse().unwrap();
            prop_assert_eq!(&parsed, &config);
            prop_assert_eq!(parsed.to_string(), rendered);
        }

        #[test]
        fn rendered_string_shape(config in descriptor()) {
            let rendered = config.format_dsn();
            let expected_suffix = if config.ssl_mode_enabled() {
                "?sslmode=enable"
            } else {
                "?sslmode=disable"
            };
            prop_assert!(rendered.starts_with("postgres://"));
            prop_assert!(rendered.ends_with(expected_suffix));
            let needle = format!("@{}/", config.host_port());
            prop_assert!(rendered.contains(&needle));
        }
    }
}

// ============================================================================
// Driver Options
// ============================================================================

mod connect_options_tests {
    use super::*;

    proptest! {
        #[test]
        fn options_match_descriptor(config in descriptor()) {
            let options = config.connect_options().unwrap();
            let (host, port) = config.host_port().rsplit_once(':').unwrap();

            prop_assert_eq!(options.get_host(), host);
            prop_assert_eq!(options.get_port(), port.parse::<u16>().unwrap());
            prop_assert_eq!(options.get_username(), config.user());
            prop_assert_eq!(options.get_database(), Some(config.database()));

            let ssl_mode = options.get_ssl_mode();
            if config.ssl_mode_enabled() {
                prop_assert!(matches!(ssl_mode, PgSslMode::Require));
            } else {
                prop_assert!(matches!(ssl_mode, PgSslMode::Disable));
            }
        }

        #[test]
        fn non_numeric_port_rejected(host in "[a-z]{1,10}", port in "[a-z]{1,5}") {
            let config = ConnectionConfig::new("u", "p", "db").with_host_port(format!("{host}:{port}"));
            prop_assert!(config.connect_options().is_err());
        }
    }
}
