// ============================================================================
// Python Bindings
// ============================================================================

use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

use pyo3::exceptions::{PyConnectionError, PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::acquisition::{Acquisition, AcquisitionResult, AcquisitionSettings};
use crate::errors::DriverError;
use crate::logging;
use crate::protocol::{BitDepth, ChannelSet, Command, Frequency, Trigger};
use crate::registers::DeviceConfig;
use crate::transport::{ReplayTransport, Transport, UsbConnector};

fn runtime_err(e: DriverError) -> PyErr {
    PyErr::new::<PyRuntimeError, _>(e.to_string())
}

fn value_err(e: impl ToString) -> PyErr {
    PyErr::new::<PyValueError, _>(e.to_string())
}

/// Calibrated samples of one acquisition.
///
/// Attributes:
///     timestamps: Sample times, in units of the configured time scale.
///     channels: Dict of channel label ("CH.<n>") to values, in units of the
///         configured voltage scale. Every list is as long as `timestamps`.
#[pyclass(name = "AcquisitionResult", frozen)]
#[derive(Clone)]
struct PyAcquisitionResult {
    #[pyo3(get)]
    timestamps: Vec<f64>,
    inner: AcquisitionResult,
}

#[pymethods]
impl PyAcquisitionResult {
    #[getter]
    fn channels<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        for (label, values) in &self.inner.channels {
            dict.set_item(label, values.clone())?;
        }
        Ok(dict)
    }

    fn __len__(&self) -> usize {
        self.timestamps.len()
    }

    fn __repr__(&self) -> String {
        let labels: Vec<&str> = self.inner.channels.keys().map(String::as_str).collect();
        format!(
            "AcquisitionResult(samples={}, channels={:?})",
            self.timestamps.len(),
            labels
        )
    }
}

impl From<AcquisitionResult> for PyAcquisitionResult {
    fn from(r: AcquisitionResult) -> Self {
        PyAcquisitionResult {
            timestamps: r.timestamps.clone(),
            inner: r,
        }
    }
}

/// USB ADC device driver.
///
/// Example:
///     >>> adc = UsbAdc.connect()
///     >>> adc.configure(channels=[0, 1], bits=12, frequency=100000)
///     >>> result = adc.acquire(mode="once", max_samples=10000)
///     >>> print(len(result), adc.stats()["lost"])
#[pyclass(name = "UsbAdc", unsendable)]
struct PyUsbAdc {
    inner: Acquisition<Box<dyn Transport>>,
}

#[pymethods]
impl PyUsbAdc {
    /// Open the first device with the default VID/PID.
    ///
    /// Args:
    ///     timeout: Read timeout in seconds; a read that times out ends the stream.
    ///     v_ref: Reference voltage.
    ///     time_scale: Unit of time in seconds.
    ///     v_scale: Unit of voltage in volts.
    #[staticmethod]
    #[pyo3(signature = (timeout=1.5, v_ref=3.3, time_scale=0.001, v_scale=1.0))]
    fn connect(timeout: f64, v_ref: f64, time_scale: f64, v_scale: f64) -> PyResult<Self> {
        let transport = UsbConnector::default()
            .open()
            .map_err(|e| PyErr::new::<PyConnectionError, _>(e.to_string()))?;
        Ok(Self::with_transport(
            Box::new(transport),
            timeout,
            v_ref,
            time_scale,
            v_scale,
        ))
    }

    /// Decode a recorded hex dump (one packet per line) instead of a device.
    #[staticmethod]
    #[pyo3(signature = (path, v_ref=3.3, time_scale=0.001, v_scale=1.0))]
    fn replay(path: &str, v_ref: f64, time_scale: f64, v_scale: f64) -> PyResult<Self> {
        let file = File::open(path).map_err(|e| PyErr::new::<PyIOError, _>(e.to_string()))?;
        let transport = ReplayTransport::from_hex_lines(BufReader::new(file))
            .map_err(|e| PyErr::new::<PyIOError, _>(e.to_string()))?;
        Ok(Self::with_transport(
            Box::new(transport),
            0.0,
            v_ref,
            time_scale,
            v_scale,
        ))
    }

    /// Write a register field by name (e.g. "trig_level").
    fn set(&mut self, name: &str, value: i64) -> PyResult<()> {
        self.inner.set(name, value).map_err(runtime_err)
    }

    /// Stop the device and write the given settings. Omitted settings are left unchanged.
    #[pyo3(signature = (
        channels=None, bits=None, frequency=None, offset=None, gain=None, samples=None,
        trigger=None, trig_channel=None, trig_level=None, trig_offset=None,
        trig_t_min=None, trig_t_max=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn configure(
        &mut self,
        channels: Option<Vec<u8>>,
        bits: Option<u8>,
        frequency: Option<u32>,
        offset: Option<u16>,
        gain: Option<u8>,
        samples: Option<u8>,
        trigger: Option<&str>,
        trig_channel: Option<u8>,
        trig_level: Option<u16>,
        trig_offset: Option<i32>,
        trig_t_min: Option<u32>,
        trig_t_max: Option<u32>,
    ) -> PyResult<()> {
        let config = DeviceConfig {
            channels: channels.map(|c| ChannelSet::from_indices(&c)),
            bits: bits.map(BitDepth::from_code).transpose().map_err(value_err)?,
            frequency: frequency
                .map(Frequency::from_hz_checked)
                .transpose()
                .map_err(value_err)?,
            offset,
            gain,
            samples,
            trigger: trigger
                .map(str::parse::<Trigger>)
                .transpose()
                .map_err(value_err)?,
            trig_channel,
            trig_level,
            trig_offset,
            trig_t_min,
            trig_t_max,
        };
        self.inner.configure(&config).map_err(runtime_err)
    }

    /// Discard buffered packets; returns how many were dropped.
    fn drain(&mut self) -> usize {
        self.inner.drain()
    }

    /// Flush stale packets, start acquisition and collect samples.
    ///
    /// Args:
    ///     mode: "once" or "continuous".
    ///     max_samples: Stop after this many samples per channel (default: until timeout).
    ///     trigger_timeout: Seconds to wait for the trigger (default: wait indefinitely).
    #[pyo3(signature = (mode="once", max_samples=None, trigger_timeout=None))]
    fn acquire(
        &mut self,
        mode: &str,
        max_samples: Option<usize>,
        trigger_timeout: Option<f64>,
    ) -> PyResult<PyAcquisitionResult> {
        let command = mode.parse::<Command>().map_err(value_err)?;
        let settings = self.inner.settings_mut();
        settings.max_samples = max_samples;
        settings.trigger_timeout =
            trigger_timeout.map(|secs| Duration::from_secs_f64(secs.max(0.0)));
        self.inner
            .run(&DeviceConfig::default(), command)
            .map(PyAcquisitionResult::from)
            .map_err(runtime_err)
    }

    /// Decode whatever the device sends until the stream ends, without
    /// touching its configuration.
    #[pyo3(signature = (max_samples=None))]
    fn read(&mut self, max_samples: Option<usize>) -> PyResult<PyAcquisitionResult> {
        self.inner.settings_mut().max_samples = max_samples;
        self.inner
            .collect(None)
            .map(PyAcquisitionResult::from)
            .map_err(runtime_err)
    }

    /// Stop acquisition.
    fn stop(&mut self) -> PyResult<()> {
        self.inner.command(Command::Stop).map_err(runtime_err)
    }

    /// Packet statistics of the current session.
    fn stats<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let s = self.inner.stats();
        let dict = PyDict::new(py);
        dict.set_item("packets", s.packets)?;
        dict.set_item("bytes", s.bytes)?;
        dict.set_item("samples", s.samples)?;
        dict.set_item("periods", s.periods)?;
        dict.set_item("lost", s.lost)?;
        dict.set_item("bad", s.bad)?;
        dict.set_item("loss_percent", s.loss_percent())?;
        Ok(dict)
    }

    fn __repr__(&self) -> String {
        let s = self.inner.settings();
        format!(
            "UsbAdc(v_ref={}, time_scale={}, v_scale={})",
            s.v_ref, s.time_scale, s.v_scale
        )
    }
}

impl PyUsbAdc {
    fn with_transport(
        transport: Box<dyn Transport>,
        timeout: f64,
        v_ref: f64,
        time_scale: f64,
        v_scale: f64,
    ) -> Self {
        let settings = AcquisitionSettings {
            v_ref,
            time_scale,
            v_scale,
            read_timeout: Duration::from_secs_f64(timeout.max(0.0)),
            max_samples: None,
            trigger_timeout: None,
        };
        PyUsbAdc {
            inner: Acquisition::new(transport, settings),
        }
    }
}

/// Route Rust log records into Python's `logging` module.
#[pyfunction]
fn enable_logging(py: Python<'_>) -> PyResult<()> {
    logging::init_python_logging(py)
}

/// Set the most verbose Rust log level forwarded to Python ("error" .. "trace").
#[pyfunction]
fn set_log_level(level: &str) -> PyResult<()> {
    logging::set_python_log_level(level)
}

/// The Python module definition
#[pymodule]
fn usbadc(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyUsbAdc>()?;
    m.add_class::<PyAcquisitionResult>()?;
    m.add_function(wrap_pyfunction!(enable_logging, m)?)?;
    m.add_function(wrap_pyfunction!(set_log_level, m)?)?;

    m.add("VENDOR_ID", crate::protocol::VENDOR_ID)?;
    m.add("PRODUCT_ID", crate::protocol::PRODUCT_ID)?;
    m.add(
        "FREQUENCIES",
        Frequency::ALL.iter().map(|f| f.hz()).collect::<Vec<u32>>(),
    )?;
    m.add("BIT_DEPTHS", vec![2u8, 4, 8, 12])?;

    Ok(())
}
