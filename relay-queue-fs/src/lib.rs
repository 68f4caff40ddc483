use std::{
    future::Future,
    io,
    marker::PhantomData,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{io::IoSlice, prelude::*};
use openat::Dir;
use relay_queue::{MailMetadata, QueueId};
use smol::blocking;
use uuid::Uuid;
use walkdir::WalkDir;

mod envelope;

// Assumptions:
//  - Moving a symlink to another folder is atomic between <queue>/queue,
//    <queue>/inflight and <queue>/cleanup
//  - Moving a file is atomic between files in the same <mail> folder
//  - Once a write is flushed without error, it is guaranteed not to be changed
//    by something other than a relay instance (or another system aware of
//    this protocol and guarantees)
//
// File structure:
//  - <queue>/data: location for the contents and metadata of the emails in the
//    queue
//  - <queue>/queue: folder for holding symlinks to the emails
//  - <queue>/inflight: folder for holding symlinks to the emails that are
//    currently in flight
//  - <queue>/cleanup: folder for holding symlinks to the emails that are
//    currently being deleted after being successfully sent
//
// Each email in <queue>/data is a folder, that is constituted of:
//  - <mail>/contents: the raw content of the email
//  - <mail>/metadata: the from/to/envelope fields, as X-MailRelay-* header
//    lines (see `envelope`)
//  - <mail>/userdata: the JSON-encoded caller-supplied `U`
//  - <mail>/schedule: the JSON-encoded (scheduled, last_attempt) couple. This
//    one is the only one that could change over time, and it gets written by
//    writing a `schedule.{{random}}` then renaming it in-place

// TODO: make those configurable
const DATA_DIR: &'static str = "data";
const QUEUE_DIR: &'static str = "queue";
const INFLIGHT_DIR: &'static str = "inflight";
#[allow(dead_code)]
const CLEANUP_DIR: &'static str = "cleanup";

const CONTENTS_FILE: &'static str = "contents";
const METADATA_FILE: &'static str = "metadata";
const USERDATA_FILE: &'static str = "userdata";
const SCHEDULE_FILE: &'static str = "schedule";
const TMP_SCHEDULE_FILE_PREFIX: &'static str = "schedule.";

struct FsStorageImpl<U> {
    path: PathBuf,
    queue: Dir,
    phantom: PhantomData<U>,
}

pub struct FsStorage<U> {
    s: Arc<FsStorageImpl<U>>,
}

impl<U> FsStorage<U> {
    pub async fn new(path: PathBuf) -> io::Result<FsStorage<U>> {
        let path2 = path.clone();
        let queue = blocking!(Dir::open(&path2))?;
        Ok(FsStorage {
            s: Arc::new(FsStorageImpl {
                path,
                queue,
                phantom: PhantomData,
            }),
        })
    }
}

impl<U> Clone for FsStorage<U> {
    fn clone(&self) -> FsStorage<U> {
        FsStorage { s: self.s.clone() }
    }
}

fn remove_mail_dir(queue: &Dir, id: &QueueId) -> io::Result<()> {
    let rel = Path::new(DATA_DIR).join(&*id.0);
    let dir = queue.sub_dir(&rel)?;
    for entry in dir.list_dir(".")? {
        let entry = entry?;
        let _ = dir.remove_file(entry.file_name());
    }
    queue.remove_dir(&rel)
}

#[async_trait]
impl<U> relay_queue::Storage<U> for FsStorage<U>
where
    U: 'static + Send + Sync + for<'a> serde::Deserialize<'a> + serde::Serialize,
{
    type Enqueuer = FsEnqueuer<U>;
    type InflightMail = FsInflightMail;
    type QueuedMail = FsQueuedMail;
    type Reader = FsReader;

    async fn list_queue(
        &self,
    ) -> Pin<Box<dyn Send + Stream<Item = Result<FsQueuedMail, (io::Error, Option<QueueId>)>>>>
    {
        Box::pin(
            scan_queue(self.clone(), QUEUE_DIR)
                .await
                .map(|r| r.map(FsQueuedMail::found)),
        )
    }

    async fn find_inflight(
        &self,
    ) -> Pin<Box<dyn Send + Stream<Item = Result<FsInflightMail, (io::Error, Option<QueueId>)>>>>
    {
        Box::pin(
            scan_queue(self.clone(), INFLIGHT_DIR)
                .await
                .map(|r| r.map(FsInflightMail::found)),
        )
    }

    async fn read_inflight(
        &self,
        mail: &FsInflightMail,
    ) -> Result<(MailMetadata<U>, FsReader), io::Error> {
        let this = self.clone();
        let id = mail.id.clone();
        smol::Task::blocking(async move {
            let dir = this.s.queue.sub_dir(&Path::new(INFLIGHT_DIR).join(&*id.0))?;
            let meta_file = dir.open_file(METADATA_FILE)?;
            let (from, to, envelope) = envelope::read(meta_file)?;
            let userdata_file = dir.open_file(USERDATA_FILE)?;
            let metadata: U = serde_json::from_reader(userdata_file).map_err(io::Error::from)?;
            let contents_file = dir.open_file(CONTENTS_FILE)?;
            Ok::<_, io::Error>((
                MailMetadata {
                    from,
                    to,
                    envelope,
                    metadata,
                },
                FsReader {
                    inner: smol::Unblock::new(contents_file),
                },
            ))
        })
        .await
    }

    fn enqueue<'s, 'a>(
        &'s self,
        meta: MailMetadata<U>,
    ) -> Pin<Box<dyn 'a + Send + Future<Output = io::Result<FsEnqueuer<U>>>>>
    where
        's: 'a,
    {
        let this = self.clone();
        Box::pin(async move {
            let id = QueueId::new(Uuid::new_v4().to_hyphenated().to_string());
            let this2 = this.clone();
            let id2 = id.clone();
            let file = smol::Task::blocking(async move {
                let rel = Path::new(DATA_DIR).join(&*id2.0);
                this2.s.queue.create_dir(&rel, 0700)?;
                let dir = this2.s.queue.sub_dir(&rel)?;
                dir.new_file(CONTENTS_FILE, 0600)
            })
            .await?;
            Ok(FsEnqueuer {
                this,
                id,
                meta,
                inner: smol::Unblock::new(file),
            })
        })
    }

    async fn reschedule(
        &self,
        mail: &mut FsQueuedMail,
        at: DateTime<Utc>,
        last_attempt: Option<DateTime<Utc>>,
    ) -> io::Result<()> {
        mail.scheduled = at;
        mail.last_attempt = last_attempt;
        let this = self.clone();
        let id = mail.id.clone();
        smol::Task::blocking(async move {
            let mut tmp_sched_file = String::from(TMP_SCHEDULE_FILE_PREFIX);
            let mut uuid_buf: [u8; 45] = Uuid::encode_buffer();
            let uuid = Uuid::new_v4()
                .to_hyphenated_ref()
                .encode_lower(&mut uuid_buf);
            tmp_sched_file.push_str(uuid);
            let tmp_rel_path = Path::new(QUEUE_DIR).join(&*id.0).join(tmp_sched_file);
            let tmp_file = this.s.queue.new_file(&tmp_rel_path, 0600)?;
            serde_json::to_writer(tmp_file, &(at, last_attempt)).map_err(io::Error::from)?;
            let rel_path = Path::new(QUEUE_DIR).join(&*id.0).join(SCHEDULE_FILE);
            this.s.queue.local_rename(&tmp_rel_path, &rel_path)?;
            Ok::<_, io::Error>(())
        })
        .await?;
        Ok(())
    }

    fn send_start<'s, 'a>(
        &'s self,
        mail: FsQueuedMail,
    ) -> Pin<
        Box<
            dyn 'a
                + Send
                + Future<Output = Result<Option<FsInflightMail>, (FsQueuedMail, io::Error)>>,
        >,
    >
    where
        's: 'a,
    {
        let this = self.clone();
        Box::pin(async move {
            let this2 = this.clone();
            let id2 = mail.id.clone();
            let res = smol::Task::blocking(async move {
                let old = Path::new(QUEUE_DIR).join(&*id2.0);
                let new = Path::new(INFLIGHT_DIR).join(&*id2.0);
                this2.s.queue.local_rename(&old, &new)
            })
            .await;
            match res {
                Ok(()) => Ok(Some(FsInflightMail {
                    id: mail.id,
                    scheduled: mail.scheduled,
                    last_attempt: mail.last_attempt,
                })),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err((mail, e)),
            }
        })
    }

    fn send_done<'s, 'a>(
        &'s self,
        mail: FsInflightMail,
    ) -> Pin<Box<dyn 'a + Send + Future<Output = Result<(), (FsInflightMail, io::Error)>>>>
    where
        's: 'a,
    {
        let this = self.clone();
        Box::pin(async move {
            let this2 = this.clone();
            let id2 = mail.id.clone();
            let res: io::Result<()> = smol::Task::blocking(async move {
                let link = Path::new(INFLIGHT_DIR).join(&*id2.0);
                this2.s.queue.remove_file(&link)?;
                remove_mail_dir(&this2.s.queue, &id2)
            })
            .await;
            res.map_err(|e| (mail, e))
        })
    }

    fn send_cancel<'s, 'a>(
        &'s self,
        mail: FsInflightMail,
    ) -> Pin<
        Box<
            dyn 'a
                + Send
                + Future<Output = Result<Option<FsQueuedMail>, (FsInflightMail, io::Error)>>,
        >,
    >
    where
        's: 'a,
    {
        let this = self.clone();
        Box::pin(async move {
            let this2 = this.clone();
            let id2 = mail.id.clone();
            let res = smol::Task::blocking(async move {
                let old = Path::new(INFLIGHT_DIR).join(&*id2.0);
                let new = Path::new(QUEUE_DIR).join(&*id2.0);
                this2.s.queue.local_rename(&old, &new)
            })
            .await;
            match res {
                Ok(()) => Ok(Some(FsQueuedMail {
                    id: mail.id,
                    scheduled: mail.scheduled,
                    last_attempt: mail.last_attempt,
                })),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err((mail, e)),
            }
        })
    }
}

struct FoundMail {
    id: QueueId,
    scheduled: DateTime<Utc>,
    last_attempt: Option<DateTime<Utc>>,
}

// TODO: handle dangling symlinks
async fn scan_queue<U, P>(
    this: FsStorage<U>,
    dir: P,
) -> impl 'static + Send + Stream<Item = Result<FoundMail, (io::Error, Option<QueueId>)>>
where
    U: 'static + Send + Sync,
    P: 'static + Send + AsRef<Path>,
{
    let dir = Arc::new(dir.as_ref().to_owned());
    // TODO: should use openat, not raw walkdir that'll do non-openat calls
    // (once that's done, `self.path` can probably be removed)
    let it = {
        let this = this.clone();
        let dir = dir.clone();
        blocking!(WalkDir::new(this.s.path.join(&*dir)).into_iter())
    };
    smol::iter(it)
        .then(move |p| {
            let this = this.clone();
            let dir = dir.clone();
            async move {
                let p = p.map_err(|e| (io::Error::from(e), None))?;
                if !p.path_is_symlink() {
                    Ok(None)
                } else {
                    let path = p
                        .path()
                        .to_str()
                        .ok_or((
                            io::Error::new(io::ErrorKind::InvalidData, "file path is not utf-8"),
                            None,
                        ))?
                        .to_owned();
                    let id = QueueId::new(&path);
                    // Note: if rust's type system knew that blocking!() is well-scoped, it'd
                    // probably make it possible to avoid the `to_owned` above
                    let (scheduled, last_attempt) = blocking!(
                        this.s
                            .queue
                            .open_file(&dir.join(path).join(SCHEDULE_FILE))
                            .and_then(|f| serde_json::from_reader(f).map_err(io::Error::from))
                    )
                    .map_err(|e| (e, Some(id.clone())))?;
                    Ok(Some(FoundMail {
                        id,
                        scheduled,
                        last_attempt,
                    }))
                }
            }
        })
        .filter_map(|r| async move { r.transpose() })
}

pub struct FsQueuedMail {
    id: QueueId,
    scheduled: DateTime<Utc>,
    last_attempt: Option<DateTime<Utc>>,
}

impl FsQueuedMail {
    fn found(f: FoundMail) -> FsQueuedMail {
        FsQueuedMail {
            id: f.id,
            scheduled: f.scheduled,
            last_attempt: f.last_attempt,
        }
    }

    // Not public, so that it doesn't encourage cloning -- cloning should work, but
    // will result in unexpected behavior
    fn clone(&self) -> FsQueuedMail {
        FsQueuedMail {
            id: self.id.clone(),
            scheduled: self.scheduled.clone(),
            last_attempt: self.last_attempt.clone(),
        }
    }
}

impl relay_queue::QueuedMail for FsQueuedMail {
    fn id(&self) -> QueueId {
        self.id.clone()
    }

    fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled
    }

    fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }
}

pub struct FsInflightMail {
    id: QueueId,
    scheduled: DateTime<Utc>,
    last_attempt: Option<DateTime<Utc>>,
}

impl FsInflightMail {
    fn found(f: FoundMail) -> FsInflightMail {
        FsInflightMail {
            id: f.id,
            scheduled: f.scheduled,
            last_attempt: f.last_attempt,
        }
    }
}

impl relay_queue::InflightMail for FsInflightMail {
    fn id(&self) -> QueueId {
        self.id.clone()
    }
}

pub struct FsReader {
    inner: smol::Unblock<std::fs::File>,
}

impl AsyncRead for FsReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

pub struct FsEnqueuer<U> {
    this: FsStorage<U>,
    id: QueueId,
    meta: MailMetadata<U>,
    inner: smol::Unblock<std::fs::File>,
}

#[async_trait]
impl<U> relay_queue::StorageEnqueuer<FsQueuedMail> for FsEnqueuer<U>
where
    U: 'static + Send + Sync + serde::Serialize,
{
    async fn commit(mut self) -> io::Result<FsQueuedMail> {
        self.inner.flush().await?;
        let id = self.id;
        let this = self.this;
        let meta = self.meta;
        let scheduled = Utc::now();
        smol::Task::blocking(async move {
            let rel = Path::new(DATA_DIR).join(&*id.0);
            let dir = this.s.queue.sub_dir(&rel)?;

            let meta_file = dir.new_file(METADATA_FILE, 0600)?;
            envelope::write(meta_file, &meta)?;

            let userdata_file = dir.new_file(USERDATA_FILE, 0600)?;
            serde_json::to_writer(userdata_file, &meta.metadata).map_err(io::Error::from)?;

            let sched_file = dir.new_file(SCHEDULE_FILE, 0600)?;
            serde_json::to_writer(sched_file, &(scheduled, None::<DateTime<Utc>>))
                .map_err(io::Error::from)?;

            this.s
                .queue
                .symlink(Path::new(QUEUE_DIR).join(&*id.0), Path::new("..").join(&rel))?;

            Ok::<_, io::Error>(())
        })
        .await?;
        Ok(FsQueuedMail {
            id: self.id,
            scheduled,
            last_attempt: None,
        })
    }
}

impl<U> AsyncWrite for FsEnqueuer<U> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        bufs: &[IoSlice],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_queue::{QueuedMail as _, Storage as _};

    #[test]
    fn enqueue_then_list_then_send_cycle() {
        smol::run(async {
            let dir = tempdir();
            for sub in &[DATA_DIR, QUEUE_DIR, INFLIGHT_DIR, CLEANUP_DIR] {
                std::fs::create_dir_all(dir.join(sub)).unwrap();
            }
            let storage: FsStorage<()> = FsStorage::new(dir.clone()).await.unwrap();

            let mut enqueuer = storage
                .enqueue(MailMetadata {
                    from: None,
                    to: vec![],
                    envelope: Default::default(),
                    metadata: (),
                })
                .await
                .unwrap();
            enqueuer.write_all(b"hello world").await.unwrap();
            let queued = enqueuer.commit().await.unwrap();
            let id = queued.id();

            let mut listed = storage.list_queue().await;
            let found = listed.next().await.unwrap().unwrap();
            assert_eq!(found.id().0, id.0);

            let inflight = storage.send_start(found).await.unwrap().unwrap();
            let (_meta, mut reader) = storage.read_inflight(&inflight).await.unwrap();
            let mut content = Vec::new();
            reader.read_to_end(&mut content).await.unwrap();
            assert_eq!(content, b"hello world");
            storage.send_done(inflight).await.unwrap();

            std::fs::remove_dir_all(&dir).ok();
        });
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("relay-queue-fs-test-{}", Uuid::new_v4()));
        dir
    }
}
