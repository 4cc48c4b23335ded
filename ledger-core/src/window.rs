//! Settlement window lifecycle
//!
//! At most one window is OPEN at a time; committed transfers are assigned to
//! it. Closing a window appends CLOSED then PROCESSING and opens the
//! successor window in the same batch, so there is no instant at which
//! committed transfers have nowhere to land.

use crate::{
    error::{Error, Result},
    storage::Storage,
    types::{SettlementWindow, WindowState, WindowStateChange},
};
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;

/// Open the genesis window. Fails if a window is already open; subsequent
/// windows are opened by [`close_window`].
pub fn open_window(storage: &Storage, now: DateTime<Utc>) -> Result<SettlementWindow> {
    if let Some(open) = storage.open_window_id()? {
        return Err(Error::InvalidState(format!(
            "Window {} is already open",
            open
        )));
    }

    let mut batch = WriteBatch::default();
    let window = stage_open(storage, &mut batch, now)?;
    storage.write(batch)?;

    tracing::info!(window_id = %window.window_id, "Settlement window opened");
    Ok(window)
}

/// Close the open window and rotate to its successor.
///
/// Appends CLOSED then PROCESSING to the closing window and opens a fresh
/// window, all in one batch. Returns the PROCESSING change and the new
/// window.
pub fn close_window(
    storage: &Storage,
    window_id: crate::types::WindowId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(WindowStateChange, SettlementWindow)> {
    let current = storage
        .current_window_state(window_id)?
        .ok_or(Error::WindowNotFound(window_id.0))?;
    if current.state != WindowState::Open {
        return Err(Error::InvalidState(format!(
            "Window {} is {}, only an OPEN window can be closed",
            window_id, current.state
        )));
    }

    let mut batch = WriteBatch::default();
    storage.append_window_state(
        &mut batch,
        &WindowStateChange {
            seq: storage.next_seq(),
            window_id,
            state: WindowState::Closed,
            reason: Some(reason.to_string()),
            created_at: now,
        },
    )?;
    let processing = WindowStateChange {
        seq: storage.next_seq(),
        window_id,
        state: WindowState::Processing,
        reason: Some(reason.to_string()),
        created_at: now,
    };
    storage.append_window_state(&mut batch, &processing)?;
    let successor = stage_open(storage, &mut batch, now)?;
    storage.write(batch)?;

    tracing::info!(
        closed = %window_id,
        opened = %successor.window_id,
        "Settlement window rotated"
    );
    Ok((processing, successor))
}

/// Append a post-closure state transition (PROCESSING onward).
///
/// OPEN and CLOSED are managed by [`open_window`] and [`close_window`] and
/// are rejected here.
pub fn mark_window(
    storage: &Storage,
    window_id: crate::types::WindowId,
    state: WindowState,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<WindowStateChange> {
    if matches!(state, WindowState::Open | WindowState::Closed) {
        return Err(Error::Validation(format!(
            "Window state {} is managed by the window lifecycle, not by mark",
            state
        )));
    }

    let current = storage
        .current_window_state(window_id)?
        .ok_or(Error::WindowNotFound(window_id.0))?;
    if current.state == state {
        return Ok(current);
    }
    if !current.state.can_transition(state) {
        return Err(Error::InvalidState(format!(
            "Window {} cannot move from {} to {}",
            window_id, current.state, state
        )));
    }

    let change = WindowStateChange {
        seq: storage.next_seq(),
        window_id,
        state,
        reason,
        created_at: now,
    };
    let mut batch = WriteBatch::default();
    storage.append_window_state(&mut batch, &change)?;
    storage.write(batch)?;

    tracing::info!(window_id = %window_id, state = %state, "Settlement window marked");
    Ok(change)
}

fn stage_open(
    storage: &Storage,
    batch: &mut WriteBatch,
    now: DateTime<Utc>,
) -> Result<SettlementWindow> {
    let window = SettlementWindow {
        window_id: storage.next_window_id(),
        created_at: now,
    };
    storage.put_window(batch, &window)?;
    storage.append_window_state(
        batch,
        &WindowStateChange {
            seq: storage.next_seq(),
            window_id: window.window_id,
            state: WindowState::Open,
            reason: None,
            created_at: now,
        },
    )?;
    storage.set_open_window(batch, Some(window.window_id))?;
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn setup() -> (Storage, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp)
    }

    #[test]
    fn test_open_genesis_window() {
        let (storage, _temp) = setup();
        let window = open_window(&storage, Utc::now()).unwrap();
        assert_eq!(storage.open_window_id().unwrap(), Some(window.window_id));
        assert_eq!(
            storage
                .current_window_state(window.window_id)
                .unwrap()
                .unwrap()
                .state,
            WindowState::Open
        );
    }

    #[test]
    fn test_second_open_rejected() {
        let (storage, _temp) = setup();
        open_window(&storage, Utc::now()).unwrap();
        assert!(matches!(
            open_window(&storage, Utc::now()),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_close_rotates_to_successor() {
        let (storage, _temp) = setup();
        let first = open_window(&storage, Utc::now()).unwrap();

        let (change, successor) =
            close_window(&storage, first.window_id, "scheduled", Utc::now()).unwrap();
        assert_eq!(change.state, WindowState::Processing);
        assert_ne!(successor.window_id, first.window_id);
        assert_eq!(storage.open_window_id().unwrap(), Some(successor.window_id));

        let history = storage.window_state_history(first.window_id).unwrap();
        let states: Vec<_> = history.iter().map(|c| c.state).collect();
        assert_eq!(
            states,
            vec![
                WindowState::Open,
                WindowState::Closed,
                WindowState::Processing
            ]
        );
    }

    #[test]
    fn test_close_non_open_window_rejected() {
        let (storage, _temp) = setup();
        let first = open_window(&storage, Utc::now()).unwrap();
        close_window(&storage, first.window_id, "scheduled", Utc::now()).unwrap();

        let result = close_window(&storage, first.window_id, "again", Utc::now());
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_mark_window_follows_transition_table() {
        let (storage, _temp) = setup();
        let first = open_window(&storage, Utc::now()).unwrap();
        close_window(&storage, first.window_id, "scheduled", Utc::now()).unwrap();

        let change = mark_window(
            &storage,
            first.window_id,
            WindowState::PendingSettlement,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(change.state, WindowState::PendingSettlement);

        // SETTLED is terminal
        mark_window(&storage, first.window_id, WindowState::Settled, None, Utc::now()).unwrap();
        let result = mark_window(
            &storage,
            first.window_id,
            WindowState::Aborted,
            None,
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_mark_window_failed_allows_retry() {
        let (storage, _temp) = setup();
        let first = open_window(&storage, Utc::now()).unwrap();
        close_window(&storage, first.window_id, "scheduled", Utc::now()).unwrap();

        mark_window(
            &storage,
            first.window_id,
            WindowState::Failed,
            Some("aggregation failed".to_string()),
            Utc::now(),
        )
        .unwrap();
        let change = mark_window(
            &storage,
            first.window_id,
            WindowState::Processing,
            Some("retry".to_string()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(change.state, WindowState::Processing);
    }

    #[test]
    fn test_mark_open_rejected() {
        let (storage, _temp) = setup();
        let first = open_window(&storage, Utc::now()).unwrap();
        let result = mark_window(&storage, first.window_id, WindowState::Open, None, Utc::now());
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_mark_same_state_is_idempotent() {
        let (storage, _temp) = setup();
        let first = open_window(&storage, Utc::now()).unwrap();
        close_window(&storage, first.window_id, "scheduled", Utc::now()).unwrap();

        mark_window(
            &storage,
            first.window_id,
            WindowState::PendingSettlement,
            None,
            Utc::now(),
        )
        .unwrap();
        let again = mark_window(
            &storage,
            first.window_id,
            WindowState::PendingSettlement,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(again.state, WindowState::PendingSettlement);
        assert_eq!(storage.window_state_history(first.window_id).unwrap().len(), 4);
    }
}
