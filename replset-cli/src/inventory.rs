//! YAML inventory of servers, the replica-set layout and the app user.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use replset_controller::AppUser;
use replset_core::{
    Candidate, ClusterConfig, Credentials, DesiredTopology, MemberConfig, MemberId, Secret,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Inventory {
    /// Scanned in this order when looking for the primary.
    pub servers: Vec<ServerEntry>,
    pub replica_set: ReplicaSetEntry,
    #[serde(default)]
    pub app_user: Option<AppUserEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: Secret,
    #[serde(default = "default_auth_source")]
    pub auth_source: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaSetEntry {
    #[serde(default = "default_set_name")]
    pub name: String,
    pub members: Vec<MemberEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberEntry {
    pub id: u32,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppUserEntry {
    pub database: String,
    pub user: String,
    pub password: Secret,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_port() -> u16 {
    27017
}

fn default_auth_source() -> String {
    "admin".to_string()
}

fn default_set_name() -> String {
    "rs0".to_string()
}

fn default_role() -> String {
    "readWrite".to_string()
}

impl Inventory {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading inventory {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing inventory {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let inventory: Inventory = serde_yaml::from_str(contents)?;
        if inventory.servers.is_empty() {
            anyhow::bail!("inventory lists no servers");
        }
        Ok(inventory)
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.servers
            .iter()
            .map(|s| {
                Candidate::new(
                    format!("{}:{}", s.host, s.port),
                    Credentials::new(s.user.clone(), s.password.clone())
                        .with_auth_source(s.auth_source.clone()),
                )
            })
            .collect()
    }

    /// Configuration submitted when the set is first initiated.
    pub fn initial_config(&self) -> ClusterConfig {
        ClusterConfig::initial(
            self.replica_set.name.clone(),
            self.replica_set
                .members
                .iter()
                .map(|m| MemberConfig::new(m.id, m.host.clone()))
                .collect(),
        )
    }

    pub fn desired_topology(&self) -> DesiredTopology {
        self.replica_set
            .members
            .iter()
            .fold(DesiredTopology::new(), |desired, m| {
                desired.with_member(MemberId::new(m.id), m.host.clone())
            })
    }

    pub fn app_user(&self) -> Option<AppUser> {
        self.app_user.as_ref().map(|entry| {
            let mut user = AppUser::read_write(
                entry.database.clone(),
                entry.user.clone(),
                entry.password.clone(),
            );
            user.roles[0].role = entry.role.clone();
            user
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
servers:
  - host: 127.0.0.1
    port: 27030
    user: mongo-0
    password: mongo-0
  - host: 127.0.0.1
    port: 27031
    user: mongo-0
    password: mongo-0
replica_set:
  name: rs0
  members:
    - id: 0
      host: mongo-0:27030
    - id: 1
      host: mongo-1:27031
app_user:
  database: appdb
  user: appuser
  password: appuserpassword
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let inventory = Inventory::load(file.path()).unwrap();
        let candidates = inventory.candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].address, "127.0.0.1:27031");
        assert_eq!(candidates[0].credentials.auth_source, "admin");
        assert_eq!(candidates[0].credentials.password.expose(), "mongo-0");
    }

    #[test]
    fn test_topology_views() {
        let inventory = Inventory::parse(SAMPLE).unwrap();

        let initial = inventory.initial_config();
        assert_eq!(initial.set_name, "rs0");
        assert_eq!(initial.version, 1);
        assert_eq!(initial.host_of(MemberId::new(1)), Some("mongo-1:27031"));

        let desired = inventory.desired_topology();
        assert_eq!(desired.host_of(MemberId::new(0)), Some("mongo-0:27030"));

        let user = inventory.app_user().unwrap();
        assert_eq!(user.username, "appuser");
        assert_eq!(user.roles[0].role, "readWrite");
        assert_eq!(user.roles[0].db, "appdb");
    }

    #[test]
    fn test_defaults_and_missing_sections() {
        let inventory = Inventory::parse(
            "servers:\n  - host: db\n    user: root\n    password: pw\n\
             replica_set:\n  members: []\n",
        )
        .unwrap();
        assert_eq!(inventory.candidates()[0].address, "db:27017");
        assert_eq!(inventory.replica_set.name, "rs0");
        assert!(inventory.app_user().is_none());
    }

    #[test]
    fn test_password_not_in_debug() {
        let inventory = Inventory::parse(SAMPLE).unwrap();
        assert!(!format!("{:?}", inventory).contains("appuserpassword"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yml");
        let err = Inventory::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.yml"));
    }

    #[test]
    fn test_empty_server_list_rejected() {
        assert!(Inventory::parse("servers: []\nreplica_set:\n  members: []\n").is_err());
    }
}
