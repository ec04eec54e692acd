//! Simulated handle with priority-ordered piece completion.

use std::cmp::Reverse;
use std::io;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use streamify_core::engine::{
    ByteStream, EngineError, InfoHash, PiecePriority, TorrentFile, TorrentHandle,
    check_read_bounds,
};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::content::PieceContent;

/// Piece availability shared between a handle, its readers and its
/// downloader task.
pub(crate) struct PieceBoard {
    state: Mutex<BoardState>,
    completed: watch::Sender<u32>,
    destroyed: AtomicBool,
}

struct BoardState {
    priorities: Vec<PiecePriority>,
    complete: Vec<bool>,
    critical_requests: Vec<(u32, u32)>,
}

impl PieceBoard {
    fn new(piece_count: u32, complete: bool) -> Self {
        let (completed, _) = watch::channel(if complete { piece_count } else { 0 });
        Self {
            state: Mutex::new(BoardState {
                priorities: vec![PiecePriority::Background; piece_count as usize],
                complete: vec![complete; piece_count as usize],
                critical_requests: Vec::new(),
            }),
            completed,
            destroyed: AtomicBool::new(false),
        }
    }

    fn is_complete(&self, piece: u32) -> bool {
        self.state
            .lock()
            .complete
            .get(piece as usize)
            .copied()
            .unwrap_or(false)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Completes the most urgent missing piece, lowest index first on ties.
    fn complete_next(&self) -> Option<u32> {
        let mut state = self.state.lock();
        let next = state
            .complete
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .max_by_key(|(index, _)| (state.priorities[*index], Reverse(*index)))
            .map(|(index, _)| index)?;

        state.complete[next] = true;
        drop(state);

        self.completed.send_modify(|count| *count += 1);
        Some(next as u32)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        // Wake blocked readers so they observe the teardown
        self.completed.send_modify(|_| {});
    }

    async fn wait_for_piece(&self, piece: u32) -> io::Result<()> {
        let mut completed = self.completed.subscribe();
        loop {
            if self.is_destroyed() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "handle destroyed during read",
                ));
            }
            if self.is_complete(piece) {
                return Ok(());
            }
            if completed.changed().await.is_err() {
                return Err(io::Error::other("piece board closed"));
            }
        }
    }
}

/// Handle produced by [`SimulatedEngine`](crate::SimulatedEngine).
pub struct SimulatedHandle {
    info_hash: InfoHash,
    name: String,
    files: Vec<TorrentFile>,
    piece_count: u32,
    content: PieceContent,
    board: Arc<PieceBoard>,
    started_at: Instant,
    initial_pieces: u32,
}

impl SimulatedHandle {
    pub(crate) fn new(
        info_hash: InfoHash,
        name: String,
        files: Vec<TorrentFile>,
        seed: u64,
        piece_length: u64,
        complete: bool,
    ) -> Self {
        let total: u64 = files.iter().map(|f| f.length).sum();
        let content = PieceContent::new(seed, info_hash, piece_length, total);
        let piece_count = total.div_ceil(content.piece_length) as u32;

        Self {
            info_hash,
            name,
            files,
            piece_count,
            content,
            board: Arc::new(PieceBoard::new(piece_count, complete)),
            started_at: Instant::now(),
            initial_pieces: if complete { piece_count } else { 0 },
        }
    }

    /// Starts completing pieces every `latency` until done or destroyed.
    pub(crate) fn spawn_downloader(&self, latency: Duration) {
        let board = Arc::downgrade(&self.board);
        let info_hash = self.info_hash;
        tokio::spawn(run_downloader(board, latency, info_hash));
    }

    pub(crate) fn destroy(&self) {
        self.board.destroy();
    }

    /// Whether piece `index` is available for reading.
    pub fn is_piece_complete(&self, index: u32) -> bool {
        self.board.is_complete(index)
    }

    /// Number of completed pieces.
    pub fn completed_pieces(&self) -> u32 {
        *self.board.completed.borrow()
    }

    /// Current priority of every piece.
    pub fn priorities(&self) -> Vec<PiecePriority> {
        self.board.state.lock().priorities.clone()
    }

    /// Every `mark_critical` request in order.
    pub fn critical_requests(&self) -> Vec<(u32, u32)> {
        self.board.state.lock().critical_requests.clone()
    }

    /// Whether the engine has removed this handle.
    pub fn is_destroyed(&self) -> bool {
        self.board.is_destroyed()
    }

    /// Bytes a complete read of `[start, end]` in file `file_index` yields.
    ///
    /// # Errors
    /// Same bounds errors as [`TorrentHandle::open_read`].
    pub fn expected_content(
        &self,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, EngineError> {
        let file = check_read_bounds(&self.files, file_index, start, end)?;
        Ok(self.content.range(file.offset + start, file.offset + end))
    }
}

async fn run_downloader(board: Weak<PieceBoard>, latency: Duration, info_hash: InfoHash) {
    loop {
        tokio::time::sleep(latency).await;

        let Some(board) = board.upgrade() else {
            break;
        };
        if board.is_destroyed() {
            break;
        }

        match board.complete_next() {
            Some(piece) => tracing::trace!(%info_hash, piece, "Simulated piece complete"),
            None => {
                tracing::debug!(%info_hash, "Simulated download complete");
                break;
            }
        }
    }
}

impl TorrentHandle for SimulatedHandle {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn piece_length(&self) -> u64 {
        self.content.piece_length
    }

    fn piece_count(&self) -> u32 {
        self.piece_count
    }

    fn files(&self) -> &[TorrentFile] {
        &self.files
    }

    fn progress(&self) -> f64 {
        if self.piece_count == 0 {
            return 1.0;
        }
        f64::from(self.completed_pieces()) / f64::from(self.piece_count)
    }

    fn download_speed(&self) -> u64 {
        let completed = self.completed_pieces();
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if completed >= self.piece_count || self.board.is_destroyed() || elapsed <= 0.0 {
            return 0;
        }

        let downloaded = u64::from(completed - self.initial_pieces) * self.content.piece_length;
        (downloaded as f64 / elapsed) as u64
    }

    fn select(&self, pieces: RangeInclusive<u32>, priority: PiecePriority) {
        let mut state = self.board.state.lock();
        for index in pieces {
            match state.priorities.get_mut(index as usize) {
                Some(slot) => *slot = priority,
                None => break,
            }
        }
    }

    fn mark_critical(&self, start_piece: u32, end_piece: u32) {
        let mut state = self.board.state.lock();
        state.critical_requests.push((start_piece, end_piece));
        for index in start_piece..=end_piece {
            match state.priorities.get_mut(index as usize) {
                Some(slot) => *slot = PiecePriority::Critical,
                None => break,
            }
        }
    }

    fn open_read(
        &self,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, EngineError> {
        let file = check_read_bounds(&self.files, file_index, start, end)?;
        if self.board.is_destroyed() {
            return Err(EngineError::HandleNotFound {
                info_hash: self.info_hash,
            });
        }

        let cursor = ReadCursor {
            board: self.board.clone(),
            content: self.content,
            position: file.offset + start,
            end: file.offset + end,
        };

        Ok(futures::stream::try_unfold(cursor, next_segment).boxed())
    }
}

struct ReadCursor {
    board: Arc<PieceBoard>,
    content: PieceContent,
    position: u64,
    end: u64,
}

/// Yields the rest of the current piece once it is complete.
async fn next_segment(mut cursor: ReadCursor) -> io::Result<Option<(Bytes, ReadCursor)>> {
    if cursor.position > cursor.end {
        return Ok(None);
    }

    let piece = cursor.content.piece_of(cursor.position);
    cursor.board.wait_for_piece(piece).await?;

    let piece_start = cursor.content.piece_start(piece);
    let segment_end = (piece_start + cursor.content.piece_length - 1).min(cursor.end);
    let data = cursor.content.piece(piece);
    let segment = Bytes::copy_from_slice(
        &data[(cursor.position - piece_start) as usize..=(segment_end - piece_start) as usize],
    );

    cursor.position = segment_end + 1;
    Ok(Some((segment, cursor)))
}
