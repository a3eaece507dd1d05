use crate::topology::{ClusterConfig, DesiredTopology};
use crate::{MemberId, ReplSetError, Result};
use std::collections::HashSet;

pub trait Validator {
    fn validate(&self) -> Result<()>;
}

impl Validator for ClusterConfig {
    fn validate(&self) -> Result<()> {
        validate_set_name(&self.set_name)?;

        if self.members.is_empty() {
            return Err(ReplSetError::invalid_config(format!(
                "replica set {} has no members",
                self.set_name
            )));
        }

        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.id) {
                return Err(ReplSetError::invalid_config(format!(
                    "duplicate member id {}",
                    member.id
                )));
            }
            validate_host(member.id, &member.host)?;
        }

        Ok(())
    }
}

impl Validator for DesiredTopology {
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.id) {
                return Err(ReplSetError::invalid_config(format!(
                    "member id {} is bound more than once",
                    member.id
                )));
            }
            if self.removed.contains(&member.id) {
                return Err(ReplSetError::invalid_config(format!(
                    "member id {} is both bound to {} and marked removed",
                    member.id, member.host
                )));
            }
            validate_host(member.id, &member.host)?;
        }
        Ok(())
    }
}

pub fn validate_set_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ReplSetError::invalid_config("replica set name is empty"));
    }
    Ok(())
}

/// Checks an advertised address: non-empty, no whitespace, and a valid
/// port when one is given.
pub fn validate_host(id: MemberId, host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(ReplSetError::invalid_config(format!(
            "member {} has an empty host",
            id
        )));
    }

    if host.chars().any(char::is_whitespace) {
        return Err(ReplSetError::invalid_config(format!(
            "member {} host {:?} contains whitespace",
            id, host
        )));
    }

    if let Some((name, port)) = host.rsplit_once(':') {
        if name.is_empty() || port.parse::<u16>().is_err() {
            return Err(ReplSetError::invalid_config(format!(
                "member {} host {:?} is not a valid host:port",
                id, host
            )));
        }
    }

    Ok(())
}
