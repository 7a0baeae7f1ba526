//! Serve a [`Store`] to [`DaemonStore`](crate::DaemonStore) clients.

use crate::cache::Store;
use crate::error::{StoreError, StoreResult};
use crate::protocol::{Request, Response, decode_nar, encode_nar, read_message, write_message};
use bytes::Bytes;
use depot_core::path_info::ValidPathInfo;
use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;

/// Accept connections forever, one thread per client.
pub fn serve_daemon(listener: UnixListener, store: Arc<Store>) -> StoreResult<()> {
    tracing::info!(uri = %store.uri(), "daemon accepting connections");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    if let Err(e) = serve_connection(stream, &store) {
                        tracing::warn!(error = %e, "daemon connection failed");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "failed to accept daemon connection"),
        }
    }
    Ok(())
}

/// Answer requests on `stream` until the client disconnects.
pub fn serve_connection(stream: UnixStream, store: &Store) -> StoreResult<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    while let Some(request) = read_message::<Request>(&mut reader)? {
        let response = handle(store, request).unwrap_or_else(|e| Response::Error {
            message: e.to_string(),
        });
        write_message(&mut writer, &response)?;
    }
    tracing::debug!("daemon client disconnected");
    Ok(())
}

fn handle(store: &Store, request: Request) -> StoreResult<Response> {
    let store_dir = store.store_dir();
    Ok(match request {
        Request::IsValidPath { path } => Response::Valid {
            valid: store.is_valid_path(&store_dir.parse_path(&path)?)?,
        },
        Request::QueryPathInfo { path } => {
            let info = match store.query_path_info(&store_dir.parse_path(&path)?) {
                Ok(info) => Some(info.to_record()),
                Err(StoreError::InvalidPath(_)) => None,
                Err(e) => return Err(e),
            };
            Response::PathInfo { info }
        }
        Request::NarFromPath { path } => Response::Nar {
            nar: encode_nar(&store.nar_from_path(&store_dir.parse_path(&path)?)?),
        },
        Request::AddToStore { info, nar, repair } => {
            let info = ValidPathInfo::from_record(store_dir, info)?;
            store.add_to_store(&info, Bytes::from(decode_nar(&nar)?), repair)?;
            Response::Done
        }
        Request::AddSignatures { path, sigs } => {
            store.add_signatures(&store_dir.parse_path(&path)?, &sigs.into_iter().collect())?;
            Response::Done
        }
        Request::QueryAllValidPaths => Response::Paths {
            paths: store
                .query_all_valid_paths()?
                .iter()
                .map(|p| p.to_string())
                .collect(),
        },
    })
}
