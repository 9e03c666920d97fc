//! Immutable descriptor of a desired database instance.

use serde::{Deserialize, Serialize};

/// Environment variables the postgres image reads at first boot.
const USER_VAR: &str = "POSTGRES_USER";
const PASSWORD_VAR: &str = "POSTGRES_PASSWORD";
const DB_VAR: &str = "POSTGRES_DB";

/// What the caller wants provisioned: credentials, logical database name,
/// and the labels that scope the container name.
///
/// Immutable after construction. Everything else — container name,
/// environment assignments, connection string — is derived on demand and
/// never stored as separate mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub username: String,
    pub password: String,
    pub database: String,
    /// Name of the service under test; first component of the container name.
    pub scope: String,
    /// Test-run realm (e.g. `unit`, `integration`); second component of the
    /// container name, so parallel runs with distinct realms never collide.
    pub realm: String,
}

impl InstanceSpec {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        scope: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        InstanceSpec {
            username: username.into(),
            password: password.into(),
            database: database.into(),
            scope: scope.into(),
            realm: realm.into(),
        }
    }

    /// Deterministic container name: `postgres-{scope}-{realm}`, with each
    /// label sanitized to Docker's allowed character set.
    ///
    /// Distinct (scope, realm) pairs produce distinct names as long as the
    /// labels already consist of `[a-zA-Z0-9_.-]` — sanitization maps other
    /// characters to `_`, which can merge exotic labels.
    pub fn instance_name(&self) -> String {
        format!(
            "postgres-{}-{}",
            sanitize_name_component(&self.scope),
            sanitize_name_component(&self.realm)
        )
    }

    /// The three environment assignments the container is started with,
    /// carrying username, password, and database name.
    pub fn env_assignments(&self) -> Vec<(String, String)> {
        vec![
            (USER_VAR.to_string(), self.username.clone()),
            (PASSWORD_VAR.to_string(), self.password.clone()),
            (DB_VAR.to_string(), self.database.clone()),
        ]
    }

    /// Format a libpq-style connection string for a discovered endpoint.
    ///
    /// Pure function of the spec plus its arguments. Transport encryption is
    /// disabled — the instance lives on loopback for the duration of a test
    /// run. Credentials are embedded verbatim: reserved URL characters in
    /// username or password (`@`, `:`, `/`, `%`) are not escaped, so keep
    /// fixture credentials within unreserved characters.
    pub fn connection_string(&self, host: &str, port: u16) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.username, self.password, host, port, self.database
        )
    }
}

/// Sanitize a label for use in a Docker container name.
///
/// Docker container names must match `[a-zA-Z0-9][a-zA-Z0-9_.-]*`. Invalid
/// characters become underscores, the component is truncated to 32
/// characters, and a leading non-alphanumeric is replaced.
fn sanitize_name_component(input: &str) -> String {
    const MAX_COMPONENT_LEN: usize = 32;

    if input.is_empty() {
        return "unnamed".to_string();
    }

    // Every char is ASCII after this map, so byte-indexing below is safe.
    let sanitized: String = input
        .chars()
        .take(MAX_COMPONENT_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.starts_with(|c: char| !c.is_ascii_alphanumeric()) {
        format!("x{}", &sanitized[1..])
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> InstanceSpec {
        InstanceSpec::new("u", "p", "d", "svc", "unit")
    }

    #[test]
    fn connection_string_is_a_pure_function_of_inputs() {
        let s = spec();
        let a = s.connection_string("localhost", 5999);
        let b = s.connection_string("localhost", 5999);
        assert_eq!(a, b);
        assert_eq!(a, "postgres://u:p@localhost:5999/d?sslmode=disable");
    }

    #[test]
    fn connection_string_binds_host_and_port_late() {
        let s = spec();
        assert_ne!(
            s.connection_string("localhost", 5999),
            s.connection_string("localhost", 6000)
        );
    }

    #[test]
    fn instance_names_differ_across_scope_and_realm() {
        let pairs = [
            ("svc", "unit"),
            ("svc", "integration"),
            ("billing", "unit"),
            ("billing", "integration"),
        ];
        let names: Vec<String> = pairs
            .iter()
            .map(|(scope, realm)| InstanceSpec::new("u", "p", "d", *scope, *realm).instance_name())
            .collect();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b, "instance names must not collide");
            }
        }
    }

    #[test]
    fn instance_name_is_deterministic() {
        assert_eq!(spec().instance_name(), "postgres-svc-unit");
        assert_eq!(spec().instance_name(), spec().instance_name());
    }

    #[test]
    fn env_assignments_carry_each_value() {
        let s = InstanceSpec::new("alice", "secret", "orders", "svc", "unit");
        let env = s.env_assignments();
        assert_eq!(
            env,
            vec![
                ("POSTGRES_USER".to_string(), "alice".to_string()),
                ("POSTGRES_PASSWORD".to_string(), "secret".to_string()),
                ("POSTGRES_DB".to_string(), "orders".to_string()),
            ]
        );
    }

    #[test]
    fn name_components_are_sanitized_for_docker() {
        let s = InstanceSpec::new("u", "p", "d", "my service!", "-ci");
        let name = s.instance_name();
        assert_eq!(name, "postgres-my_service_-xci");
        // Resulting name stays within Docker's allowed character set.
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'));
    }

    #[test]
    fn empty_labels_get_a_placeholder() {
        let s = InstanceSpec::new("u", "p", "d", "", "unit");
        assert_eq!(s.instance_name(), "postgres-unnamed-unit");
    }
}
