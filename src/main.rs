//! Exercise generic-variable device support with a small simulated driver.
//!
//! Registers three groups of variables, binds records to them, lets the
//! driver publish values through I/O interrupt scanning, and performs a
//! number of asynchronous writes that a driver thread completes.

use std::{
    error::Error,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use clap::Parser;
use epics_devsup::{
    alarm::{Alarm, AlarmStatus, Severity},
    genvar::{GenVar, GenVarDevSup, WaitStatus},
    record::{Record, ScanMode, TimeSource},
    records::{LonginRecord, LongoutRecord},
    registry::Registries,
    scan::{Scheduler, initialize},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

#[derive(Parser)]
struct Options {
    /// Number of asynchronous writes to perform
    #[clap(short = 'n', long, default_value_t = 3)]
    writes: u32,
    /// Bucket-count exponent of the generic variable registry (8..=16)
    #[clap(long)]
    ld_table_size: Option<u32>,
    /// Show debug output
    #[clap(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn lock<R>(record: &Arc<Mutex<R>>) -> MutexGuard<'_, R> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

fn nanos(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos()
}

fn report(record: &Arc<Mutex<impl Record>>, value: i32) {
    let record = lock(record);
    let common = record.common();
    info!(
        "{:<10} = {value:<11} {:<14} t={}ns",
        common.name,
        common.alarm().to_string(),
        nanos(common.time)
    );
}

/// Complete every asynchronous write to `var`, until `stop` is cancelled
fn complete_writes(var: Arc<GenVar>, stop: CancellationToken) {
    while !stop.is_cancelled() {
        match var.wait(0.1) {
            WaitStatus::Ok => {
                let _guard = var.lock();
                {
                    let mut data = var.data();
                    data.timestamp += Duration::from_nanos(1);
                    data.alarm = Alarm::new(AlarmStatus::Write, Severity::Minor);
                    debug!("Driver received {}", data.value());
                }
                if let Err(e) = var.complete_processing() {
                    warn!("Unable to complete write: {e}");
                }
            }
            WaitStatus::TimedOut => {}
            status => {
                warn!("Driver thread stopping: wait returned {status:?}");
                break;
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 1)]
async fn main() -> Result<(), Box<dyn Error>> {
    // Make sure panics from threads cause the whole process to terminate
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));
    let opts = Options::parse();

    let filter = EnvFilter::default()
        .add_directive(
            match opts.verbose {
                0 => LevelFilter::INFO,
                1 => LevelFilter::DEBUG,
                2.. => LevelFilter::TRACE,
            }
            .into(),
        )
        .add_directive("tokio=off".parse()?)
        .add_directive("runtime=off".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_filter(filter);
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(fmt_layer))?;

    let registries = Arc::new(Registries::new());
    if let Some(ld_table_size) = opts.ld_table_size {
        registries.genvars.configure(ld_table_size);
    }
    info!("Registry uses {} buckets", registries.genvars.table_size());

    let list_s = registries.add_scan_list("testS")?;
    let list_l = registries.add_scan_list("testL")?;
    registries.genvars.register(
        "testS",
        vec![GenVar::builder(0xffffu16).scan_list(list_s.clone()).lock().build()],
    )?;
    let test_l = registries.genvars.register(
        "testL",
        vec![
            GenVar::builder(-1i32).scan_list(list_l.clone()).lock().build(),
            GenVar::builder(-2i32 as u32).scan_list(list_l.clone()).build(),
        ],
    )?;
    let async_l = registries.genvars.register(
        "asyncL",
        vec![
            GenVar::builder(0u32)
                .lock()
                .event()
                .timestamp(UNIX_EPOCH + Duration::from_nanos(44444444))
                .build(),
        ],
    )?;

    let scheduler = Scheduler::new();
    let handle = scheduler.handle();
    let stop = CancellationToken::new();
    let runner = tokio::spawn(scheduler.run(stop.clone()));

    let dset = Arc::new(GenVarDevSup::new(registries.clone()));
    let inputs = [
        ("GV:testS", "#C0 S0 @testS", TimeSource::Database),
        ("GV:testL0", "#C0 S0 @testL", TimeSource::Database),
        ("GV:testL1", "#C1 S0 @testL", TimeSource::Device),
    ]
    .map(|(name, link, tse)| {
        let mut record = LonginRecord::new(name, link, dset.clone());
        record.common.scan = ScanMode::IoEvent;
        record.common.tse = tse;
        handle.adopt(record)
    });
    let mut output = LongoutRecord::new("GV:asyncL", "#C0 S2 @asyncL", dset.clone());
    output.common.tse = TimeSource::Device;
    let output = handle.adopt(output);

    for record in &inputs {
        initialize(&**record)?;
    }
    initialize(&*output)?;

    let driver = {
        let var = async_l.bind(0).ok_or("asyncL has no variables")?;
        let stop = stop.clone();
        thread::spawn(move || complete_writes(var, stop))
    };

    if let Some(var) = test_l.bind(1) {
        let mut data = var.data();
        data.alarm = Alarm::new(AlarmStatus::Read, Severity::Minor);
        data.timestamp = UNIX_EPOCH + Duration::from_nanos(12345678);
    }
    info!(
        "Scan requests queued {} records",
        list_l.request() + list_s.request()
    );

    for value in 1..=opts.writes as i32 {
        {
            let mut record = lock(&output);
            record.val = value * 10;
            record.process();
        }
        for _ in 0..100 {
            if !lock(&output).common.pact {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let val = lock(&output).val;
        report(&output, val);
    }

    for record in &inputs {
        let val = lock(record).val;
        report(record, val);
    }

    stop.cancel();
    runner.await?;
    if driver.join().is_err() {
        warn!("Driver thread panicked");
    }
    Ok(())
}
