//! DDL watch: event triggers notify a channel; a long-lived listener task
//! debounces the notifications into rebuild signals, delivered over a
//! bounded channel to a separate rebuild task that owns the hot swap.

use crate::error::AppError;
use crate::state::AppState;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const WATCH_SCHEMA: &str = "pghatch_watch";
pub const WATCH_CHANNEL: &str = "pghatch_watch";

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Installs the watch schema, notify functions and event triggers.
/// Idempotent: existing objects are replaced, never duplicated.
const INSTALL_SQL: &str = r#"
create schema if not exists pghatch_watch;

create or replace function pghatch_watch.notify_watchers_ddl() returns event_trigger as $$
begin
  perform pg_notify(
    'pghatch_watch',
    json_build_object(
      'type', 'ddl',
      'payload',
      (select json_agg(json_build_object('schema', schema_name, 'command', command_tag))
       from pg_event_trigger_ddl_commands() as x)
    )::text
  );
end;
$$ language plpgsql;

create or replace function pghatch_watch.notify_watchers_drop() returns event_trigger as $$
begin
  perform pg_notify(
    'pghatch_watch',
    json_build_object(
      'type', 'drop',
      'payload',
      (select json_agg(distinct x.schema_name) from pg_event_trigger_dropped_objects() as x)
    )::text
  );
end;
$$ language plpgsql;

drop event trigger if exists pghatch_watch_ddl;
create event trigger pghatch_watch_ddl
  on ddl_command_end
  when tag in (
    'ALTER AGGREGATE',
    'ALTER DOMAIN',
    'ALTER EXTENSION',
    'ALTER FOREIGN TABLE',
    'ALTER FUNCTION',
    'ALTER POLICY',
    'ALTER SCHEMA',
    'ALTER TABLE',
    'ALTER TYPE',
    'ALTER VIEW',
    'COMMENT',
    'CREATE AGGREGATE',
    'CREATE DOMAIN',
    'CREATE EXTENSION',
    'CREATE FOREIGN TABLE',
    'CREATE FUNCTION',
    'CREATE INDEX',
    'CREATE POLICY',
    'CREATE RULE',
    'CREATE SCHEMA',
    'CREATE TABLE',
    'CREATE TABLE AS',
    'CREATE VIEW',
    'DROP AGGREGATE',
    'DROP DOMAIN',
    'DROP EXTENSION',
    'DROP FOREIGN TABLE',
    'DROP FUNCTION',
    'DROP INDEX',
    'DROP OWNED',
    'DROP POLICY',
    'DROP RULE',
    'DROP SCHEMA',
    'DROP TABLE',
    'DROP TYPE',
    'DROP VIEW',
    'GRANT',
    'REVOKE',
    'SELECT INTO'
  )
  execute procedure pghatch_watch.notify_watchers_ddl();

drop event trigger if exists pghatch_watch_drop;
create event trigger pghatch_watch_drop
  on sql_drop
  execute procedure pghatch_watch.notify_watchers_drop();
"#;

const UNINSTALL_SQL: &str = r#"
drop event trigger if exists pghatch_watch_ddl;
drop event trigger if exists pghatch_watch_drop;
drop schema if exists pghatch_watch cascade;
"#;

pub async fn install(pool: &PgPool) -> Result<(), AppError> {
    sqlx::raw_sql(INSTALL_SQL).execute(pool).await?;
    tracing::info!(schema = WATCH_SCHEMA, "ddl watch installed");
    Ok(())
}

pub async fn uninstall(pool: &PgPool) -> Result<(), AppError> {
    sqlx::raw_sql(UNINSTALL_SQL).execute(pool).await?;
    tracing::info!(schema = WATCH_SCHEMA, "ddl watch removed");
    Ok(())
}

/// Why a rebuild was requested; logged by the rebuild task.
#[derive(Debug, Clone, Copy)]
enum RebuildSignal {
    /// Debounced DDL notification.
    Change,
    /// Listener reconnected; notifications may have been lost.
    Resync,
}

/// Capacity 1: a second signal while one is queued carries no extra
/// information, so senders coalesce on a full channel.
const SIGNAL_BUFFER: usize = 1;

/// Handles for the two watch tasks: the listener, which owns the
/// notification connection and only debounces and sends, and the rebuilder,
/// which receives signals and performs the hot swap.
pub struct WatchTasks {
    pub listener: JoinHandle<()>,
    pub rebuilder: JoinHandle<()>,
}

/// Spawns the listener and rebuild tasks, joined by a bounded channel.
pub fn spawn(state: AppState) -> WatchTasks {
    let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
    WatchTasks {
        listener: tokio::spawn(listen(state.clone(), tx)),
        rebuilder: tokio::spawn(rebuild_loop(state, rx)),
    }
}

/// Listener task: holds the LISTEN connection, reconnecting with
/// exponential backoff, and turns notifications into rebuild signals.
/// Ends when the rebuild task goes away.
async fn listen(state: AppState, tx: mpsc::Sender<RebuildSignal>) {
    let mut backoff = BACKOFF_BASE;
    let mut reconnected = false;
    loop {
        match connect(&state).await {
            Ok(listener) => {
                backoff = BACKOFF_BASE;
                if reconnected && !send_signal(&tx, RebuildSignal::Resync) {
                    return;
                }
                match listen_loop(&state, listener, &tx).await {
                    Ok(()) => return,
                    Err(e) => tracing::warn!(error = %e, "schema watcher connection lost"),
                }
                reconnected = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "schema watcher cannot connect");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

async fn connect(state: &AppState) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(&state.pool).await?;
    listener.listen(WATCH_CHANNEL).await?;
    Ok(listener)
}

/// Ok(()) means the rebuild task dropped its receiver (shutdown); Err is a
/// lost connection and the caller reconnects.
async fn listen_loop(
    state: &AppState,
    mut listener: PgListener,
    tx: &mpsc::Sender<RebuildSignal>,
) -> Result<(), sqlx::Error> {
    let mut heartbeat = tokio::time::interval(state.config.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            notification = listener.try_recv() => {
                match notification? {
                    Some(n) => {
                        tracing::info!(payload = n.payload(), "schema change notification");
                        debounce(&mut listener, state.config.debounce).await?;
                        if !send_signal(tx, RebuildSignal::Change) {
                            return Ok(());
                        }
                    }
                    None => {
                        // The listener dropped and re-established its
                        // connection; notifications may have been lost.
                        if !send_signal(tx, RebuildSignal::Resync) {
                            return Ok(());
                        }
                    }
                }
            }
            _ = heartbeat.tick() => {
                sqlx::query("SELECT 1").execute(&state.pool).await?;
                tracing::trace!("watch heartbeat ok");
            }
        }
    }
}

/// Coalesces notifications arriving within the debounce window.
async fn debounce(listener: &mut PgListener, window: Duration) -> Result<(), sqlx::Error> {
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(()),
            more = listener.try_recv() => {
                more?;
            }
        }
    }
}

/// False when the receiver is gone. A full channel already carries a
/// pending rebuild, so the signal coalesces.
fn send_signal(tx: &mpsc::Sender<RebuildSignal>, signal: RebuildSignal) -> bool {
    match tx.try_send(signal) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!(?signal, "rebuild already queued, coalescing");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Rebuild task: consumes signals and performs the hot swap; a failed
/// rebuild is retried on the periodic reconciliation timer.
async fn rebuild_loop(state: AppState, mut rx: mpsc::Receiver<RebuildSignal>) {
    let mut reconcile = tokio::time::interval(state.config.reconcile);
    reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut rebuild_pending = false;

    loop {
        tokio::select! {
            signal = rx.recv() => {
                match signal {
                    Some(signal) => {
                        if matches!(signal, RebuildSignal::Resync) {
                            tracing::warn!("listener reconnected, forcing rebuild");
                        }
                        rebuild_pending = !attempt_rebuild(&state).await;
                    }
                    None => return,
                }
            }
            _ = reconcile.tick() => {
                if rebuild_pending {
                    tracing::info!("retrying failed rebuild");
                    rebuild_pending = !attempt_rebuild(&state).await;
                }
            }
        }
    }
}

/// True on success. Failures never disturb the published resolver set.
async fn attempt_rebuild(state: &AppState) -> bool {
    match state.rebuild().await {
        Ok(summary) => {
            tracing::info!(mounted = summary.mounted, "schema rebuild complete");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "schema rebuild failed, keeping previous endpoints");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_sql_is_idempotent() {
        assert!(INSTALL_SQL.contains("create schema if not exists pghatch_watch"));
        assert!(INSTALL_SQL.contains("create or replace function"));
        assert!(INSTALL_SQL.contains("drop event trigger if exists pghatch_watch_ddl"));
        assert!(INSTALL_SQL.contains("drop event trigger if exists pghatch_watch_drop"));
        // Never the original drop-the-world form.
        assert!(!INSTALL_SQL.contains("drop schema"));
    }

    #[test]
    fn triggers_cover_ddl_and_drops() {
        assert!(INSTALL_SQL.contains("on ddl_command_end"));
        assert!(INSTALL_SQL.contains("on sql_drop"));
        assert!(INSTALL_SQL.contains("'ALTER TABLE'"));
        assert!(INSTALL_SQL.contains("'CREATE TABLE'"));
        assert!(INSTALL_SQL.contains("'DROP TABLE'"));
    }

    #[test]
    fn uninstall_only_drops_if_exists() {
        for line in UNINSTALL_SQL.lines().filter(|l| l.starts_with("drop")) {
            assert!(line.contains("if exists"), "not guarded: {}", line);
        }
    }

    #[test]
    fn signals_coalesce_on_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(SIGNAL_BUFFER);
        assert!(send_signal(&tx, RebuildSignal::Change));
        // A second signal while one is queued is absorbed, not an error.
        assert!(send_signal(&tx, RebuildSignal::Resync));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_stops_the_listener() {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        drop(rx);
        assert!(!send_signal(&tx, RebuildSignal::Change));
    }
}
