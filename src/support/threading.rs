//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mapistore.
//
// Mapistore is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mapistore is distributed in the hope  that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mapistore. If not, see <http://www.gnu.org/licenses/>.

//! Background work for operations the client allowed to complete
//! asynchronously.
//!
//! At most one worker thread exists at any given time. It is spun up when
//! work arrives and exits once the queue drains, since the engine spends most
//! of its life serving synchronous requests.

use std::sync::Mutex;

use lazy_static::lazy_static;

lazy_static! {
    /// The current background work queue.
    ///
    /// If `None`, no background worker thread is currently running.
    static ref BACKGROUND_WORK: Mutex<Option<Vec<Box<dyn FnMut () + Send>>>> =
        Mutex::new(None);
}

const MAX_BACKGROUND_WORK: usize = 256;

/// Run the given task in the background.
///
/// In ideal cases, this call returns immediately. `task` is invoked at some
/// point in the future, in submission order.
///
/// If too much work is already queued, the task is run synchronously.
pub fn run_in_background(task: impl FnOnce() + Send + 'static) {
    {
        let mut work = BACKGROUND_WORK.lock().unwrap();
        let work = work.get_or_insert_with(|| {
            std::thread::spawn(run_background_work);
            Vec::new()
        });

        if work.len() < MAX_BACKGROUND_WORK {
            let mut taskopt = Some(task);
            work.push(Box::new(move || {
                if let Some(task) = taskopt.take() {
                    task()
                }
            }));
            return;
        }
    }

    // Too much work queued, run synchronously
    task();
}

fn run_background_work() {
    loop {
        let mut task = {
            let mut work = BACKGROUND_WORK.lock().unwrap();

            let next = match work.as_mut() {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            };
            match next {
                Some(task) => task,
                None => {
                    *work = None;
                    break;
                },
            }
        };

        task()
    }
}
