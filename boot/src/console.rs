//! COM1 console and klog backend.

use spin::Mutex;
use uart_16550::SerialPort;

use trapgate_lib::{klog_info, klog_init, klog_register_backend};

const COM1: u16 = 0x3F8;

struct Com1 {
    port: Option<SerialPort>,
}

impl Com1 {
    const fn new() -> Self {
        Self { port: None }
    }

    fn ensure_init(&mut self) -> &mut SerialPort {
        self.port.get_or_insert_with(|| {
            // SAFETY: COM1 is only driven through this wrapper.
            let mut port = unsafe { SerialPort::new(COM1) };
            port.init();
            port
        })
    }

    fn write_str(&mut self, s: &str) {
        let port = self.ensure_init();
        for byte in s.bytes() {
            if byte == b'\n' {
                port.send(b'\r');
            }
            port.send(byte);
        }
    }
}

static SERIAL: Mutex<Com1> = Mutex::new(Com1::new());

fn com1_backend(text: &str) {
    SERIAL.lock().write_str(text);
}

/// Program the UART and route klog output to it.
pub fn console_init() {
    SERIAL.lock().ensure_init();
    klog_init();
    klog_register_backend(com1_backend);
    klog_info!("console: COM1 at {:#x}", COM1);
}
