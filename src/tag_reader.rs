use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 标签技术类型（目前只支持 EM4100 五字节 ID）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagTechnology {
    Em4100,
}

impl TagTechnology {
    /// 该技术的固定载荷长度。
    pub fn payload_len(&self) -> usize {
        match self {
            TagTechnology::Em4100 => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagTechnology::Em4100 => "EM4100",
        }
    }
}

/// 读卡器错误类型。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RfidError {
    Driver { op: &'static str, code: i32 },
}

/// 标签回调（在扫描线程中执行）。
pub type TagCallback = Box<dyn Fn(&[u8]) + Send>;

struct Dispatch {
    scanning: AtomicBool,
    callbacks: Mutex<HashMap<TagTechnology, TagCallback>>,
}

/// 扫描线程使用的投递口：校验长度后调用已注册回调。
#[derive(Clone)]
pub struct TagSink {
    dispatch: Arc<Dispatch>,
}

impl TagSink {
    /// 投递一次读到的标签，被接受并交给回调时返回 true。
    pub fn deliver(&self, technology: TagTechnology, data: &[u8]) -> bool {
        if !self.dispatch.scanning.load(Ordering::Acquire) {
            return false;
        }
        if data.len() != technology.payload_len() {
            log::debug!(
                "{} tag dropped, length {} != {}",
                technology.as_str(),
                data.len(),
                technology.payload_len()
            );
            return false;
        }
        let Ok(callbacks) = self.dispatch.callbacks.lock() else {
            return false;
        };
        // 持锁检查，stop() 返回后不会再进入回调
        if !self.dispatch.scanning.load(Ordering::Acquire) {
            return false;
        }
        match callbacks.get(&technology) {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }
}

/// 读卡器硬件接口（UART 模块或测试替身）。
pub trait RfidScanner: Send {
    /// 开始后台扫描（非阻塞）。
    fn start(&mut self, sink: TagSink) -> Result<(), RfidError>;
    /// 停止扫描。
    fn stop(&mut self);
}

/// 读卡器：管理扫描生命周期并把标签分发给回调；进程级单例。
pub struct TagReader {
    scanner: Box<dyn RfidScanner>,
    dispatch: Arc<Dispatch>,
}

impl TagReader {
    pub fn new(scanner: Box<dyn RfidScanner>) -> Self {
        Self {
            scanner,
            dispatch: Arc::new(Dispatch {
                scanning: AtomicBool::new(false),
                callbacks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 注册回调，覆盖同一技术的旧回调。
    pub fn register_callback<F>(&mut self, technology: TagTechnology, callback: F)
    where
        F: Fn(&[u8]) + Send + 'static,
    {
        if let Ok(mut callbacks) = self.dispatch.callbacks.lock() {
            if callbacks.insert(technology, Box::new(callback)).is_some() {
                log::debug!("{} callback replaced", technology.as_str());
            }
        }
    }

    /// 开始扫描（幂等）。
    pub fn start(&mut self) -> Result<(), RfidError> {
        if self.is_scanning() {
            return Ok(());
        }
        self.dispatch.scanning.store(true, Ordering::Release);
        let sink = TagSink {
            dispatch: self.dispatch.clone(),
        };
        if let Err(err) = self.scanner.start(sink) {
            self.dispatch.scanning.store(false, Ordering::Release);
            log::warn!("RFID scan start failed: {:?}", err);
            return Err(err);
        }
        log::debug!("RFID scan started");
        Ok(())
    }

    /// 停止扫描；返回后回调不再被调用。
    pub fn stop(&mut self) {
        if !self.is_scanning() {
            return;
        }
        self.scanner.stop();
        self.dispatch.scanning.store(false, Ordering::Release);
        // 等待正在执行的回调结束
        drop(self.dispatch.callbacks.lock());
        log::debug!("RFID scan stopped");
    }

    pub fn is_scanning(&self) -> bool {
        self.dispatch.scanning.load(Ordering::Acquire)
    }
}
