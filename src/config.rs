use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub patient_id_prefix: String,
    pub patient_counter: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let db_max_connections = match env::var("DB_MAX_CONNECTIONS") {
            Ok(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|e| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a positive integer: {e}"))?,
            Err(_) => 5,
        };
        let patient_id_prefix = env::var("PATIENT_ID_PREFIX").unwrap_or_else(|_| "p".to_string());
        check_patient_id_prefix(&patient_id_prefix)?;
        let patient_counter =
            env::var("PATIENT_COUNTER").unwrap_or_else(|_| "patientCounter".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            patient_id_prefix,
            patient_counter,
        })
    }
}

/// Planned appointment ids split the patient id at its first '-'.
fn check_patient_id_prefix(prefix: &str) -> anyhow::Result<()> {
    if prefix.contains('-') {
        anyhow::bail!("PATIENT_ID_PREFIX must not contain '-': {prefix:?}");
    }
    Ok(())
}
