//! Structural migrations applied to every tenant schema.
//!
//! Scripts are unqualified: they are executed with `search_path` set to the
//! tenant's schema, so the same set builds `public`, `acme`, `globex`, ...

/// A single versioned migration script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Strictly increasing version number, recorded once applied.
    pub version: u32,
    /// Human-readable name for logs.
    pub name: &'static str,
    /// One or more SQL statements.
    pub sql: &'static str,
}

/// Ordered set of migrations, the "current structure" of a tenant schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

/// Returned when a migration list is not strictly ordered by version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("migration versions must be strictly increasing: {previous} is followed by {next}")]
pub struct MigrationOrderError {
    pub previous: u32,
    pub next: u32,
}

impl MigrationSet {
    /// Builds a set, checking that versions strictly increase.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationOrderError`] on a duplicate or out-of-order version.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationOrderError> {
        for pair in migrations.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(MigrationOrderError {
                    previous: pair[0].version,
                    next: pair[1].version,
                });
            }
        }
        Ok(Self { migrations })
    }

    /// An empty set. Provisioning with it only creates the schema.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    /// The marketplace schema: users, auth tokens, provider profiles, and
    /// service requests with their technician responses and event log.
    #[must_use]
    pub fn marketplace() -> Self {
        Self {
            migrations: MARKETPLACE.to_vec(),
        }
    }

    /// All migrations, in version order.
    #[must_use]
    pub fn all(&self) -> &[Migration] {
        &self.migrations
    }

    /// Highest version in the set, or `None` if empty.
    #[must_use]
    pub fn latest_version(&self) -> Option<u32> {
        self.migrations.last().map(|m| m.version)
    }

    /// Migrations whose version is not in `applied`, in version order.
    pub fn pending<'a>(&'a self, applied: &'a [u32]) -> impl Iterator<Item = &'a Migration> + 'a {
        self.migrations
            .iter()
            .filter(move |m| !applied.contains(&m.version))
    }

    /// Number of migrations in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the set has no migrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl Default for MigrationSet {
    fn default() -> Self {
        Self::marketplace()
    }
}

const MARKETPLACE: [Migration; 4] = [
    Migration {
        version: 1,
        name: "create_users",
        sql: r"
CREATE TABLE users (
    id UUID PRIMARY KEY,
    email TEXT UNIQUE,
    phone_number TEXT UNIQUE,
    password_hash TEXT,
    full_name TEXT NOT NULL,
    document_id TEXT UNIQUE,
    profile_photo_url TEXT,
    skills TEXT[] NOT NULL DEFAULT '{}',
    current_latitude DOUBLE PRECISION,
    current_longitude DOUBLE PRECISION,
    last_location_update TIMESTAMPTZ,
    status TEXT NOT NULL DEFAULT 'ACTIVE',
    email_verified BOOLEAN NOT NULL DEFAULT FALSE,
    phone_verified BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_login_at TIMESTAMPTZ,
    deleted_at TIMESTAMPTZ
);
",
    },
    Migration {
        version: 2,
        name: "create_refresh_tokens",
        sql: r"
CREATE TABLE refresh_tokens (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TIMESTAMPTZ NOT NULL,
    revoked_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX refresh_tokens_user_id_idx ON refresh_tokens(user_id);
",
    },
    Migration {
        version: 3,
        name: "create_provider_profiles",
        sql: r"
CREATE TABLE provider_profiles (
    user_id UUID PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    bio TEXT,
    service_categories TEXT[] NOT NULL DEFAULT '{}',
    verified BOOLEAN NOT NULL DEFAULT FALSE,
    verified_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
",
    },
    Migration {
        version: 4,
        name: "create_service_requests",
        sql: r"
CREATE TABLE service_requests (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id),
    problem TEXT NOT NULL,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    address_text TEXT NOT NULL,
    service_city TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'REQUESTED',
    chosen_technician_id UUID REFERENCES users(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX service_requests_status_idx ON service_requests(status);
CREATE TABLE service_request_technician_responses (
    service_request_id UUID NOT NULL REFERENCES service_requests(id) ON DELETE CASCADE,
    technician_id UUID NOT NULL REFERENCES users(id),
    status TEXT NOT NULL,
    reason TEXT,
    responded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (service_request_id, technician_id)
);
CREATE TABLE service_request_events (
    id UUID PRIMARY KEY,
    service_request_id UUID NOT NULL REFERENCES service_requests(id) ON DELETE CASCADE,
    actor_id UUID REFERENCES users(id),
    event_type TEXT NOT NULL,
    payload JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
",
    },
];
