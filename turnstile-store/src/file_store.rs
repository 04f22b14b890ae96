use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use turnstile_core::{StoreError, Ticket, TicketStore, TicketStatus};

/// File-backed ticket store, one record per line.
///
/// Record shapes, space-delimited:
///
/// 1. `id` — available
/// 2. `id userId holdTxId` — held
/// 3. `id userId holdTxId *` — purchase in progress
/// 4. `id userId holdTxId buyTxId` — purchased
///
/// `update` rewrites the whole file to `<path>.new` and renames it over the
/// original, so a crash leaves either the old file or the new one intact.
/// This type is not safe for concurrent use; the manager serializes access.
pub struct FileTicketStore {
    path: PathBuf,
}

impl FileTicketStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes an initial file of available tickets, one id per line.
    /// Overwrites any existing file at `path`.
    pub async fn seed(path: impl AsRef<Path>, ids: &[&str]) -> Result<(), StoreError> {
        let mut contents = ids.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        tokio::fs::write(path.as_ref(), contents).await?;
        Ok(())
    }

    fn decode(line: &str) -> Result<Ticket, StoreError> {
        let invalid = || StoreError::InvalidRecord {
            line: line.to_string(),
        };
        let parts: Vec<&str> = line.split(' ').collect();
        // Doubled or trailing delimiters produce empty fields; a corrupted
        // file must fail at load, not parse into half-empty records.
        if parts.iter().any(|part| part.is_empty()) {
            return Err(invalid());
        }
        let mut ticket = Ticket::new(*parts.first().ok_or_else(invalid)?);
        match parts.len() {
            1 => {}
            3 => {
                ticket.status = TicketStatus::Held;
                ticket.user_id = Some(parts[1].to_string());
                ticket.hold_tx_id = Some(parts[2].to_string());
            }
            4 => {
                ticket.user_id = Some(parts[1].to_string());
                ticket.hold_tx_id = Some(parts[2].to_string());
                if parts[3] == "*" {
                    ticket.status = TicketStatus::Buying;
                } else {
                    ticket.status = TicketStatus::Bought;
                    ticket.buy_tx_id = Some(parts[3].to_string());
                }
            }
            _ => return Err(invalid()),
        }
        Ok(ticket)
    }

    fn encode(ticket: &Ticket) -> Result<String, StoreError> {
        let field = |value: &Option<String>| {
            value.clone().ok_or_else(|| StoreError::InvalidRecord {
                line: format!("{} ({:?})", ticket.id, ticket.status),
            })
        };
        Ok(match ticket.status {
            TicketStatus::Available => ticket.id.clone(),
            TicketStatus::Held => {
                format!("{} {} {}", ticket.id, field(&ticket.user_id)?, field(&ticket.hold_tx_id)?)
            }
            TicketStatus::Buying => {
                format!("{} {} {} *", ticket.id, field(&ticket.user_id)?, field(&ticket.hold_tx_id)?)
            }
            TicketStatus::Bought => format!(
                "{} {} {} {}",
                ticket.id,
                field(&ticket.user_id)?,
                field(&ticket.hold_tx_id)?,
                field(&ticket.buy_tx_id)?
            ),
        })
    }
}

#[async_trait]
impl TicketStore for FileTicketStore {
    async fn load_all(&self) -> Result<Vec<Ticket>, StoreError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(Self::decode)
            .collect()
    }

    async fn update(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let mut found = false;
        let mut rewritten = String::with_capacity(contents.len() + 64);
        for line in contents.lines().filter(|line| !line.is_empty()) {
            let id = line.split(' ').next().unwrap_or(line);
            if id == ticket.id {
                rewritten.push_str(&Self::encode(ticket)?);
                found = true;
            } else {
                rewritten.push_str(line);
            }
            rewritten.push('\n');
        }
        if !found {
            return Err(StoreError::UnknownTicket(ticket.id.clone()));
        }

        let mut staging = self.path.clone().into_os_string();
        staging.push(".new");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, rewritten).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(ticket_id = %ticket.id, status = ?ticket.status, "persisted ticket record");
        Ok(())
    }
}
