use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};

/// Run blocking `work` over `jobs` with at most `workers` in flight.
///
/// Results arrive in completion order. Returns once every job has finished.
pub async fn run_blocking<J, T, E, F>(
    jobs: Vec<J>,
    workers: usize,
    work: F,
) -> Result<Vec<(J, Result<T, E>)>>
where
    J: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(&J) -> Result<T, E> + Send + Sync + 'static,
{
    let workers = workers.max(1);
    let total = jobs.len();
    let work = Arc::new(work);
    let semaphore = Arc::new(Semaphore::new(workers));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Workers send results, this task collects them
    let (tx, mut rx) = mpsc::channel(workers * 2);

    for job in jobs {
        let work = Arc::clone(&work);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            let task_job = job.clone();
            let result = tokio::task::spawn_blocking(move || work(&task_job)).await;
            let _ = tx.send((job, result)).await;
        });
    }

    // rx closes once every spawned task has dropped its sender
    drop(tx);

    let mut results = Vec::with_capacity(total);
    while let Some((job, result)) = rx.recv().await {
        match result {
            Ok(outcome) => results.push((job, outcome)),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => return Err(anyhow::anyhow!("worker task cancelled: {e}")),
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn every_job_reports() {
        let results = run_blocking((0..20).collect(), 4, |n: &u32| {
            if n % 5 == 0 {
                Err(format!("bad {n}"))
            } else {
                Ok(n * 2)
            }
        })
        .await
        .unwrap();
        assert_eq!(results.len(), 20);
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        assert_eq!(failed, 4);
        assert!(results
            .iter()
            .all(|(n, r)| r.as_ref().map_or(true, |v| *v == n * 2)));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        run_blocking((0..12).collect::<Vec<u32>>(), 3, move |_| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ()>(())
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_jobs() {
        let results = run_blocking(Vec::<u8>::new(), 2, |_| Ok::<_, ()>(()))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
