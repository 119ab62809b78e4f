// Copyright (C) 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size background pool that drives `Blob::write_cache()` for every
//! blob the router hands it. A shared FIFO queue, a "presence" set to
//! coalesce duplicate enqueues, and a single condition variable are all
//! the synchronization this needs: without the presence set a flood of
//! writes against one hot blob would enqueue it thousands of times for
//! no extra benefit, since one `write_cache()` pass already drains
//! whatever was pending when it started.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

use log::{error, trace};

use crate::blob::Blob;
use crate::router::ShardRouter;

struct Queue {
    pending: VecDeque<Arc<Blob>>,
    present: HashSet<usize>,
    in_flight: usize,
    need_exit: bool,
}

fn blob_addr(blob: &Arc<Blob>) -> usize {
    Arc::as_ptr(blob) as usize
}

struct Shared {
    queue: Mutex<Queue>,
    cond: Condvar,
    router: Mutex<Weak<ShardRouter>>,
}

pub struct FlushWorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl FlushWorkerPool {
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                present: HashSet::new(),
                in_flight: 0,
                need_exit: false,
            }),
            cond: Condvar::new(),
            router: Mutex::new(Weak::new()),
        });

        let handles = (0..num_threads.max(1))
            .map(|idx| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("smack-flush-{}", idx))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn flush worker thread")
            })
            .collect();

        FlushWorkerPool { shared, handles }
    }

    /// Stash a back-reference to the owning router. Not on the hot path;
    /// kept so a future diagnostic (or an enqueue triggered indirectly by
    /// a worker, e.g. after a split) has a way back to the router without
    /// every blob needing one.
    pub fn set_router(&self, router: Arc<ShardRouter>) {
        *self.shared.router.lock().unwrap() = Arc::downgrade(&router);
    }

    /// Enqueue `blob` for a flush pass unless it is already waiting.
    pub fn enqueue(&self, blob: Arc<Blob>) {
        let mut queue = self.shared.queue.lock().unwrap();
        let addr = blob_addr(&blob);
        if queue.present.insert(addr) {
            queue.pending.push_back(blob);
            self.shared.cond.notify_one();
        }
    }

    /// Block until the queue is empty and no worker is mid-flush.
    pub fn wait_for_all(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        while !queue.pending.is_empty() || queue.in_flight > 0 {
            queue = self.shared.cond.wait(queue).unwrap();
        }
    }
}

impl Drop for FlushWorkerPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.need_exit = true;
        }
        self.shared.cond.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let blob = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(blob) = queue.pending.pop_front() {
                    queue.present.remove(&blob_addr(&blob));
                    queue.in_flight += 1;
                    break Some(blob);
                }
                if queue.need_exit {
                    break None;
                }
                queue = shared.cond.wait(queue).unwrap();
            }
        };

        let blob = match blob {
            Some(blob) => blob,
            None => return,
        };

        loop {
            match blob.write_cache() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    error!("flush worker: write_cache failed: {}", e);
                    break;
                }
            }
        }
        trace!("flush worker: blob flush pass complete");

        let mut queue = shared.queue.lock().unwrap();
        queue.in_flight -= 1;
        shared.cond.notify_all();
    }
}
