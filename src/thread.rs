// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Thread groups and thread pools.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem::drop;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use log::error;
use slab::Slab;

////////////////////////////////////////////////////////////////////////
// THREAD GROUPS                                                      //
////////////////////////////////////////////////////////////////////////

/// A group of threads managed together.
///
/// A `ThreadGroup` manages the creation and operation of a number of
/// one-shot threads (see [`ThreadGroup::start_oneshot`]). Additionally,
/// a `ThreadGroup` may have a number of child [`ThreadPool`]s, which
/// provide a fixed number of worker threads that accept one-shot tasks.
/// See [`ThreadGroup::start_pool`].
///
/// A `ThreadGroup` may be shut down through [`ThreadGroup::shut_down`].
/// New threads cannot be started in a `ThreadGroup` once shutdown is
/// initiated. [`ThreadGroup::await_shutdown`] can be used to wait for
/// shutdown to complete. This condition requires all threads to have
/// exited; pool workers finish the tasks already queued and then exit,
/// so shutting down and then awaiting is how a batch of submitted work
/// is joined.
pub struct ThreadGroup {
    records: Mutex<GroupRecords>,

    /// Allows threads to wait for group shutdown events. This is used
    /// with the `records` mutex. All waiting threads are notified when
    /// (1) shutdown is initiated and (2) shutdown is complete.
    shutdown_wakeup: Condvar,
}

/// The internal records of a [`ThreadGroup`].
#[derive(Default)]
struct GroupRecords {
    thread_count: usize,
    pools: Slab<Arc<ThreadPool>>,
    shutting_down: bool,
}

impl ThreadGroup {
    /// Creates a new thread group.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(GroupRecords::default()),
            shutdown_wakeup: Condvar::new(),
        })
    }

    /// Starts a one-shot thread in the `ThreadGroup`. This thread will
    /// execute `task` once. The task will not be restarted, even if the
    /// thread panics.
    pub fn start_oneshot<F>(self: &Arc<Self>, name: Option<String>, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut records = self.records.lock().unwrap();
        if records.shutting_down {
            Err(Error::ShuttingDown)
        } else {
            start_oneshot(self.clone(), &mut records, name, task).map_err(Into::into)
        }
    }

    /// Shuts down the `ThreadGroup`. Note that this includes any
    /// [`ThreadPool`]s created in the group.
    pub fn shut_down(&self) {
        let mut records = self.records.lock().unwrap();
        records.shutting_down = true;
        for pool in records.pools.drain() {
            pool.shut_down_without_removing();
        }
        self.shutdown_wakeup.notify_all();
    }

    /// Waits for the `ThreadGroup` to shut down. This is defined as (1)
    /// shutdown having been initiated ([`ThreadGroup::shut_down`]) and
    /// (2) the thread count having dropped to zero. Note that if this
    /// is called from a thread within the group, a deadlock will occur
    /// (since the thread count will never become zero).
    pub fn await_shutdown(&self) {
        let records = self.records.lock().unwrap();
        let _guard = self
            .shutdown_wakeup
            .wait_while(records, |r| !r.shutting_down || r.thread_count > 0)
            .unwrap();
    }

    /// Returns whether the `ThreadGroup` is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.records.lock().unwrap().shutting_down
    }
}

/// A handle to be owned by a one-shot thread. When dropped (when the
/// thread exits or panics), it will perform necessary clean-up actions
/// (see [`end_thread`]).
struct OneshotHandle {
    group: Arc<ThreadGroup>,
    parent: ThreadId,
}

/// The implementation of one-shot thread creation.
fn start_oneshot<F>(
    group: Arc<ThreadGroup>,
    records: &mut MutexGuard<GroupRecords>,
    name: Option<String>,
    task: F,
) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    records.thread_count += 1;
    let handle = OneshotHandle {
        group,
        parent: thread::current().id(),
    };
    let result = thread::Builder::new()
        .name(name.unwrap_or_else(|| "anonymous".to_owned()))
        .spawn(move || {
            task();
            drop(handle);
        });
    if result.is_err() {
        records.thread_count -= 1;
    }
    result.and(Ok(()))
}

impl Drop for OneshotHandle {
    fn drop(&mut self) {
        let current_thread = thread::current();

        // If we are being dropped in the parent thread, then the new
        // thread failed to start (on the OS level). In this case,
        // start_oneshot handles any necessary clean-up. This is
        // important, since otherwise we would be locking the records
        // mutex twice from the same thread!
        if current_thread.id() == self.parent {
            return;
        }

        if thread::panicking() {
            let thread_name = current_thread.name().unwrap_or("anonymous");
            error!("One-shot thread {} panicked", thread_name);
        }

        let mut records = self.group.records.lock().unwrap();
        end_thread(&mut records, &self.group.shutdown_wakeup);
    }
}

/// Performs clean-up actions when a thread exits.
fn end_thread(records: &mut MutexGuard<GroupRecords>, shutdown_wakeup: &Condvar) {
    records.thread_count -= 1;
    if records.shutting_down && records.thread_count == 0 {
        shutdown_wakeup.notify_all();
    }
}

////////////////////////////////////////////////////////////////////////
// THREAD POOLS                                                       //
////////////////////////////////////////////////////////////////////////

/// A thread pool that provides a fixed number of worker threads on
/// which to execute tasks.
///
/// A `ThreadPool` is always created within a [`ThreadGroup`] through
/// [`ThreadGroup::start_pool`].
///
/// Queueing an arbitrary number of tasks is not supported:
/// [`ThreadPool::submit`] blocks until a worker is free to take the
/// task. This is what bounds the number of servers the distributor
/// works on at once.
///
/// A `ThreadPool` is shut down if its parent [`ThreadGroup`] is shut
/// down. Furthermore, it may be independently shut down through
/// [`ThreadPool::shut_down`]. No new task submissions are allowed after
/// shutdown is initiated, but tasks already accepted still run.
pub struct ThreadPool {
    group: Arc<ThreadGroup>,
    key: usize,
    records: Mutex<PoolRecords>,

    /// Allows worker threads to wait for new tasks. Used with the
    /// `records` mutex.
    task_wakeup: Condvar,

    /// Allows submitting threads to wait for an available worker
    /// thread. Used with the `records` mutex.
    available_wakeup: Condvar,
}

/// The internal records of a [`ThreadPool`].
struct PoolRecords {
    queue: VecDeque<Box<dyn FnOnce() + Send + 'static>>,
    available_workers: usize,
    shutting_down: bool,
}

impl ThreadGroup {
    /// Starts a new [`ThreadPool`] in this `ThreadGroup` with `workers`
    /// worker threads.
    pub fn start_pool(
        self: &Arc<Self>,
        name: Option<String>,
        workers: usize,
    ) -> Result<Arc<ThreadPool>, Error> {
        let mut records = self.records.lock().unwrap();
        if records.shutting_down {
            return Err(Error::ShuttingDown);
        }

        let entry = records.pools.vacant_entry();
        let name = name.unwrap_or_else(|| "anonymous pool".to_owned());
        let pool = Arc::new(ThreadPool {
            group: self.clone(),
            key: entry.key(),
            records: Mutex::new(PoolRecords {
                queue: VecDeque::with_capacity(workers),
                available_workers: 0,
                shutting_down: false,
            }),
            task_wakeup: Condvar::new(),
            available_wakeup: Condvar::new(),
        });
        entry.insert(pool.clone());

        let result = start_pool_workers(self, &mut records, &pool, workers, &name);
        if result.is_err() {
            // This will shut down any workers that successfully
            // started.
            pool.shut_down_without_removing();
            records.pools.remove(pool.key);
        }
        result.map_err(Into::into).and(Ok(pool))
    }
}

impl ThreadPool {
    /// Submits a task. If no worker thread is available to run it, this
    /// will block until one becomes available.
    pub fn submit<F>(self: &Arc<Self>, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut records = self.records.lock().unwrap();
        loop {
            if records.shutting_down {
                return Err(Error::ShuttingDown);
            } else if records.available_workers > records.queue.len() {
                break;
            }
            records = self.available_wakeup.wait(records).unwrap();
        }
        records.queue.push_back(Box::new(task));
        self.task_wakeup.notify_one();
        Ok(())
    }

    /// Shuts down the `ThreadPool`. (The parent [`ThreadGroup`] is
    /// *not* shut down.)
    pub fn shut_down(&self) {
        let mut group_records = self.group.records.lock().unwrap();
        group_records.pools.remove(self.key);
        drop(group_records);
        self.shut_down_without_removing();
    }

    /// Shuts down the `ThreadPool`, without removing it from its parent
    /// [`ThreadGroup`]'s collection of pools. This exists for
    /// [`ThreadGroup`] code that has already acquired the group's
    /// records mutex for itself and can do the removal manually.
    fn shut_down_without_removing(&self) {
        let mut records = self.records.lock().unwrap();
        records.shutting_down = true;
        self.task_wakeup.notify_all();
        self.available_wakeup.notify_all();
    }

    /// Returns whether the `ThreadPool` is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.records.lock().unwrap().shutting_down
    }
}

/// Tries to start the worker threads of a [`ThreadPool`]. Note that on
/// failure, some workers may still be active!
fn start_pool_workers(
    group: &Arc<ThreadGroup>,
    group_records: &mut MutexGuard<GroupRecords>,
    pool: &Arc<ThreadPool>,
    workers: usize,
    base_name: &str,
) -> io::Result<()> {
    for i in 0..workers {
        let pool = pool.clone();
        let name = format!("{} worker {}", base_name, i);
        let task = move || pool_worker_loop(pool);
        start_oneshot(group.clone(), group_records, Some(name), task)?;
    }
    Ok(())
}

/// The get task/run task loop for [`ThreadPool`] worker threads. A
/// worker drains the queue before honoring shutdown, so tasks accepted
/// before [`ThreadGroup::shut_down`] all run.
fn pool_worker_loop(pool: Arc<ThreadPool>) {
    loop {
        let mut records = pool.records.lock().unwrap();
        records.available_workers += 1;
        pool.available_wakeup.notify_one();
        loop {
            if !records.queue.is_empty() {
                break;
            } else if records.shutting_down {
                return;
            }
            records = pool.task_wakeup.wait(records).unwrap();
        }
        let task = records.queue.pop_front().unwrap();
        records.available_workers -= 1;
        drop(records);
        task();
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error type for [`ThreadGroup`] and [`ThreadPool`] operations.
#[derive(Debug)]
pub enum Error {
    /// An OS-level error occurred during the creation of a thread.
    Io(io::Error),

    /// The [`ThreadGroup`] or [`ThreadPool`] is shutting down.
    ShuttingDown,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::ShuttingDown => f.write_str("thread group or pool is shutting down"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
