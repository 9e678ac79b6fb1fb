use std::io;
use std::sync::mpsc;

pub struct TaskMeta {
    pub name: &'static str,
    pub stack_bytes: Option<usize>,
}

pub trait AppTask {
    fn meta(&self) -> TaskMeta;

    /// Take ownership of everything the loop needs and hand back the loop.
    fn into_runner(self: Box<Self>) -> Box<dyn FnOnce() + Send + 'static>;
}

pub trait Spawner {
    fn spawn(&self, meta: TaskMeta, f: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()>;
}

/// Spawn every task parked on a gate, then open all gates together so no
/// task posts into a mailbox whose reader does not exist yet.
///
/// When a spawn fails the gates already handed out are dropped and the
/// parked tasks return without running.
pub fn start_all(tasks: Vec<Box<dyn AppTask>>) -> io::Result<()> {
    let spawner = TaskSpawner;

    // Build all runners before any thread exists
    let runners: Vec<(TaskMeta, Box<dyn FnOnce() + Send>)> = tasks
        .into_iter()
        .map(|t| (t.meta(), t.into_runner()))
        .collect();

    let mut gates = Vec::with_capacity(runners.len());
    for (meta, runner) in runners {
        let (open, gate) = mpsc::channel::<()>();
        let name = meta.name;
        spawner.spawn(
            meta,
            Box::new(move || {
                if gate.recv().is_ok() {
                    runner();
                }
            }),
        )?;
        log::debug!("task {name} parked");
        gates.push(open);
    }

    for open in gates {
        // a task that already died has nothing to release
        let _ = open.send(());
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
mod spawner {
    use std::io;

    use super::{Spawner, TaskMeta};

    pub struct HostSpawner;

    impl Spawner for HostSpawner {
        fn spawn(&self, meta: TaskMeta, f: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
            let mut b = std::thread::Builder::new().name(meta.name.into());
            if let Some(stack_sz) = meta.stack_bytes {
                b = b.stack_size(stack_sz);
            }
            b.spawn(f).map(|_| ())
        }
    }
}
#[cfg(not(target_os = "espidf"))]
pub use spawner::HostSpawner as TaskSpawner;

#[cfg(target_os = "espidf")]
mod spawner {
    use std::ffi::{c_char, CString};
    use std::io;

    use esp_idf_svc::sys::{
        esp_err_t, esp_pthread_cfg_t, esp_pthread_get_cfg, esp_pthread_get_default_config,
        esp_pthread_set_cfg, ESP_ERR_INVALID_ARG, ESP_OK,
    };

    use super::{Spawner, TaskMeta};

    pub struct EspSpawner;

    impl Spawner for EspSpawner {
        fn spawn(&self, meta: TaskMeta, f: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
            let mut b = std::thread::Builder::new();
            if let Some(stack_sz) = meta.stack_bytes {
                b = b.stack_size(stack_sz);
            }

            with_next_pthread_cfg(&meta, || b.spawn(f))
                .map_err(|err| io::Error::other(format!("pthread cfg for {}: {err}", meta.name)))?
                .map(|_| ())
        }
    }

    /// Run `f` with the FreeRTOS task name and stack of `meta` applied to
    /// the next pthread, then restore the previous config.
    fn with_next_pthread_cfg<T>(meta: &TaskMeta, f: impl FnOnce() -> T) -> Result<T, esp_err_t> {
        // FreeRTOS task names are plain C strings
        let cname = CString::new(meta.name).map_err(|_| ESP_ERR_INVALID_ARG as esp_err_t)?;

        unsafe {
            let mut prev: esp_pthread_cfg_t = core::mem::zeroed();
            let had_prev = esp_pthread_get_cfg(&mut prev) == ESP_OK;

            let mut cfg = if had_prev {
                prev
            } else {
                esp_pthread_get_default_config()
            };

            cfg.thread_name = cname.as_ptr() as *const c_char;
            if let Some(stack) = meta.stack_bytes {
                cfg.stack_size = stack;
            }

            let ret = esp_pthread_set_cfg(&cfg);
            if ret != ESP_OK {
                return Err(ret);
            }

            let out = f();

            let restore = if had_prev {
                prev
            } else {
                esp_pthread_get_default_config()
            };
            let _ = esp_pthread_set_cfg(&restore);

            Ok(out)
        }
    }
}
#[cfg(target_os = "espidf")]
pub use spawner::EspSpawner as TaskSpawner;
