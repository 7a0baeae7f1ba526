//! Client for a store served over a Unix socket.

use crate::error::{StoreError, StoreResult};
use crate::protocol::{Request, Response, decode_nar, encode_nar, read_message, write_message};
use crate::traits::{BackendKind, StoreBackend};
use bytes::Bytes;
use depot_core::path_info::ValidPathInfo;
use depot_core::store_path::{StoreDir, StorePath};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::instrument;

struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Connection {
    fn open(socket: &Path) -> StoreResult<Self> {
        let stream = UnixStream::connect(socket).map_err(|e| {
            StoreError::Protocol(format!(
                "cannot connect to daemon at '{}': {e}",
                socket.display()
            ))
        })?;
        let writer = stream.try_clone()?;
        tracing::debug!(socket = %socket.display(), "connected to daemon");
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }
}

/// A store whose operations are forwarded to a daemon.
///
/// The socket is not touched until the first operation.
pub struct DaemonStore {
    store_dir: StoreDir,
    socket: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl DaemonStore {
    pub fn new(store_dir: StoreDir, socket: impl Into<PathBuf>) -> Self {
        Self {
            store_dir,
            socket: socket.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn call(&self, request: &Request) -> StoreResult<Response> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(Connection::open(&self.socket)?);
        }
        let result = match guard.as_mut() {
            Some(conn) => Self::exchange(conn, request),
            None => Err(StoreError::Protocol("no daemon connection".to_string())),
        };
        match result {
            Ok(Response::Error { message }) => Err(StoreError::Protocol(message)),
            Ok(response) => Ok(response),
            Err(e) => {
                // Drop a connection that failed mid-exchange; the next call reconnects.
                *guard = None;
                Err(e)
            }
        }
    }

    fn exchange(conn: &mut Connection, request: &Request) -> StoreResult<Response> {
        write_message(&mut conn.writer, request)?;
        read_message(&mut conn.reader)?
            .ok_or_else(|| StoreError::Protocol("daemon closed the connection".to_string()))
    }

    fn unexpected(response: Response) -> StoreError {
        StoreError::Protocol(format!("unexpected daemon response: {response:?}"))
    }
}

impl StoreBackend for DaemonStore {
    fn uri(&self) -> String {
        "daemon".to_string()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Daemon
    }

    fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    #[instrument(skip(self), fields(backend = "daemon"))]
    fn is_valid_path_uncached(&self, path: &StorePath) -> StoreResult<bool> {
        match self.call(&Request::IsValidPath {
            path: path.to_string(),
        })? {
            Response::Valid { valid } => Ok(valid),
            other => Err(Self::unexpected(other)),
        }
    }

    #[instrument(skip(self), fields(backend = "daemon"))]
    fn query_path_info_uncached(&self, path: &StorePath) -> StoreResult<Option<ValidPathInfo>> {
        match self.call(&Request::QueryPathInfo {
            path: path.to_string(),
        })? {
            Response::PathInfo { info: Some(record) } => {
                Ok(Some(ValidPathInfo::from_record(&self.store_dir, record)?))
            }
            Response::PathInfo { info: None } => Ok(None),
            other => Err(Self::unexpected(other)),
        }
    }

    #[instrument(skip(self), fields(backend = "daemon"))]
    fn nar_from_path(&self, path: &StorePath) -> StoreResult<Bytes> {
        match self.call(&Request::NarFromPath {
            path: path.to_string(),
        })? {
            Response::Nar { nar } => Ok(Bytes::from(decode_nar(&nar)?)),
            other => Err(Self::unexpected(other)),
        }
    }

    #[instrument(skip(self, info, nar), fields(backend = "daemon", path = %info.path, size = nar.len()))]
    fn add_to_store(&self, info: &ValidPathInfo, nar: Bytes, repair: bool) -> StoreResult<()> {
        match self.call(&Request::AddToStore {
            info: info.to_record(),
            nar: encode_nar(&nar),
            repair,
        })? {
            Response::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    fn add_signatures(&self, path: &StorePath, sigs: &BTreeSet<String>) -> StoreResult<()> {
        match self.call(&Request::AddSignatures {
            path: path.to_string(),
            sigs: sigs.iter().cloned().collect(),
        })? {
            Response::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    fn query_all_valid_paths(&self) -> StoreResult<Vec<StorePath>> {
        match self.call(&Request::QueryAllValidPaths)? {
            Response::Paths { paths } => paths
                .iter()
                .map(|p| self.store_dir.parse_path(p).map_err(StoreError::from))
                .collect(),
            other => Err(Self::unexpected(other)),
        }
    }
}
