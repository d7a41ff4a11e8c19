//! Session registry and the per-session supervisor task.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{ControlFrame, DuplexChannel, FrameSink, FrameSource};
use super::{SessionId, SessionState, SessionSummary};
use crate::activity::{ActivityEvent, ActivitySink};
use crate::config::SessionsConfig;
use crate::error::{CoreError, CoreResult};
use crate::principal::Principal;
use crate::process;
use crate::sandbox::Sandbox;

struct SessionEntry {
    owner: String,
    started_at: DateTime<Utc>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
}

struct Inner {
    sandbox: Sandbox,
    config: SessionsConfig,
    activity: Arc<dyn ActivitySink>,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

/// Owns every live shell session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(sandbox: Sandbox, config: SessionsConfig, activity: Arc<dyn ActivitySink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sandbox,
                config,
                activity,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a shell in the principal's root and bridge it to `channel`.
    pub async fn open<C: DuplexChannel>(
        &self,
        principal: &Principal,
        channel: C,
    ) -> CoreResult<SessionId> {
        let root = self.inner.sandbox.tenant_root(&principal.tenant)?;
        let config = &self.inner.config;

        let mut cmd = Command::new(&config.shell);
        cmd.args(&config.shell_args)
            .current_dir(&root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::isolate_process_group(&mut cmd);

        let child = cmd.spawn().map_err(|err| {
            CoreError::LaunchFailed(format!("{}: {}", config.shell.display(), err))
        })?;

        let id = format!("{}_{}", principal.tenant, Uuid::new_v4().simple());
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let cancel = CancellationToken::new();

        {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.insert(
                id.clone(),
                SessionEntry {
                    owner: principal.tenant.clone(),
                    started_at: Utc::now(),
                    state: state_rx,
                    cancel: cancel.clone(),
                },
            );
            state_tx.send_replace(SessionState::Running);
        }

        info!(
            session_id = %id,
            tenant = %principal.tenant,
            pid = ?child.id(),
            "terminal session started"
        );
        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            id.clone(),
            principal.clone(),
            child,
            channel,
            cancel,
            state_tx,
        ));

        self.inner
            .activity
            .record(ActivityEvent::new(
                principal,
                "terminal_connect",
                format!("Terminal session started: {id}"),
            ))
            .await;
        Ok(id)
    }

    /// Terminate a session on behalf of `requester`. Returns once it is closed.
    pub async fn kill(&self, id: &str, requester: &Principal) -> CoreResult<()> {
        let (cancel, mut state) = {
            let sessions = self.inner.sessions.lock().await;
            let entry = sessions
                .get(id)
                .ok_or_else(|| CoreError::not_found(format!("session {id}")))?;
            if !requester.may_act_for(&entry.owner) {
                return Err(CoreError::forbidden(format!(
                    "{} may not terminate session {id}",
                    requester.tenant
                )));
            }
            (entry.cancel.clone(), entry.state.clone())
        };

        cancel.cancel();
        // The supervisor dropping its sender also means the session is gone.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;

        self.inner
            .activity
            .record(ActivityEvent::new(
                requester,
                "kill_terminal",
                format!("Killed terminal session: {id}"),
            ))
            .await;
        Ok(())
    }

    /// Sessions visible to `requester`, sorted by id.
    pub async fn list(&self, requester: &Principal) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = {
            let sessions = self.inner.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, entry)| requester.is_elevated() || entry.owner == requester.tenant)
                .map(|(id, entry)| SessionSummary {
                    id: id.clone(),
                    owner: entry.owner.clone(),
                    state: *entry.state.borrow(),
                    started_at: entry.started_at,
                })
                .collect()
        };
        summaries.sort_by(|a, b| a.id.cmp(&b.id));

        self.inner
            .activity
            .record(ActivityEvent::new(
                requester,
                "list_terminal_sessions",
                "Listed terminal sessions",
            ))
            .await;
        summaries
    }

    /// Current state of a registered session.
    pub async fn state(&self, id: &str) -> Option<SessionState> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(id).map(|entry| *entry.state.borrow())
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Terminate every live session and wait for all of them to close.
    pub async fn shutdown(&self) {
        let pending: Vec<(SessionId, CancellationToken, watch::Receiver<SessionState>)> = {
            let sessions = self.inner.sessions.lock().await;
            sessions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.cancel.clone(), entry.state.clone()))
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        info!(count = pending.len(), "terminating terminal sessions");
        for (_, cancel, _) in &pending {
            cancel.cancel();
        }
        for (id, _, mut state) in pending {
            if state
                .wait_for(|s| *s == SessionState::Closed)
                .await
                .is_err()
            {
                debug!(session_id = %id, "session supervisor already gone");
            }
        }
    }
}

#[derive(Debug)]
enum EndReason {
    ChannelClosed,
    OutputClosed,
    ProcessExited,
    Killed,
}

/// Drives one session until either flow ends or it is cancelled, then tears it down.
async fn supervise<C: DuplexChannel>(
    inner: Arc<Inner>,
    id: SessionId,
    principal: Principal,
    mut child: Child,
    channel: C,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
) {
    let (mut sink, mut source) = channel.split();
    let chunk = inner.config.read_chunk_bytes.max(1);
    // The id is gone once the shell has been reaped.
    let pgid = child.id();

    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(64);
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, out_tx.clone(), chunk)));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, out_tx.clone(), chunk)));
    }
    drop(out_tx);
    let stdin = child.stdin.take();

    let reason = tokio::select! {
        _ = inbound(&mut source, stdin, &id) => EndReason::ChannelClosed,
        _ = outbound(&mut out_rx, &mut sink, &id) => EndReason::OutputClosed,
        _ = child.wait() => EndReason::ProcessExited,
        _ = cancel.cancelled() => EndReason::Killed,
    };
    debug!(session_id = %id, ?reason, "terminal session ending");

    state.send_replace(SessionState::Terminating);
    let grace = inner.config.terminate_grace();
    if matches!(reason, EndReason::ProcessExited) {
        // Background children may still hold the output pipes open.
        process::sweep_group(pgid);
        // Deliver what the shell wrote before it exited.
        let _ = tokio::time::timeout(grace, outbound(&mut out_rx, &mut sink, &id)).await;
    }
    let status = process::terminate(&mut child, grace).await;
    for task in pumps {
        task.abort();
    }

    inner.sessions.lock().await.remove(&id);
    info!(session_id = %id, ?status, "terminal session closed");
    inner
        .activity
        .record(ActivityEvent::new(
            &principal,
            "terminal_disconnect",
            format!("Terminal session ended: {id}"),
        ))
        .await;
    state.send_replace(SessionState::Closed);
    sink.close().await;
}

/// Channel → process input. Returns when the channel closes or the input breaks.
async fn inbound<S: FrameSource>(source: &mut S, stdin: Option<ChildStdin>, id: &str) {
    let Some(mut stdin) = stdin else {
        return;
    };

    while let Some(frame) = source.recv().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(session_id = %id, "channel read error: {}", err);
                return;
            }
        };

        if let Some(ControlFrame::Resize { cols, rows }) = ControlFrame::parse(&frame) {
            // Pipes have no window size to update.
            debug!(session_id = %id, cols, rows, "ignoring resize");
            continue;
        }

        if let Err(err) = stdin.write_all(&frame).await {
            debug!(session_id = %id, "shell input closed: {}", err);
            return;
        }
        if let Err(err) = stdin.flush().await {
            debug!(session_id = %id, "shell input closed: {}", err);
            return;
        }
    }
}

/// Process output → channel. Returns when both output streams reached EOF.
async fn outbound<S: FrameSink>(rx: &mut mpsc::Receiver<Bytes>, sink: &mut S, id: &str) {
    while let Some(chunk) = rx.recv().await {
        if let Err(err) = sink.send(chunk).await {
            debug!(session_id = %id, "channel write error: {}", err);
            return;
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Bytes>, chunk: usize) {
    let mut buf = vec![0u8; chunk];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => {
                if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("error reading shell output: {}", err);
                return;
            }
        }
    }
}
