//! Region, metric, parameter and attribute events.
//!
//! Every event has two forms: one acting on the calling thread's location
//! and an `_on` form taking the location explicitly, for adapters that
//! already hold it. Both take no lock when the calling thread is the one
//! recording on the location.

use crate::definitions::{
    AttributeHandle, MetricHandle, ParameterHandle, RegionHandle, RegionInfo, SourceFileHandle,
};
use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::thread::ThreadModel;
use crate::trace::{Attribute, AttributeValue, MetricValue, TraceEvent};
use crate::tracing_compat::trace;
use crate::types::{AttributeType, MetricValueType, ParameterType};

use super::{Measurement, Recorder};

impl<M: ThreadModel> Measurement<M> {
    // =====================================================================
    // Definitions
    // =====================================================================

    /// Defines a region. Regions matching the configured filter are not
    /// defined; [`RegionHandle::FILTERED`] is returned for them.
    pub fn define_region(&self, info: &RegionInfo<'_>) -> Result<RegionHandle> {
        if self.config.filter.is_filtered(info.name) {
            trace!(region = info.name, "region filtered");
            return Ok(RegionHandle::FILTERED);
        }
        self.definitions.define_region(info)
    }

    /// Defines a source file.
    pub fn define_source_file(&self, name: &str) -> Result<SourceFileHandle> {
        self.definitions.new_source_file(name)
    }

    /// Defines a metric. A metric defined again under the same name with
    /// different properties keeps its first definition.
    pub fn define_metric(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        value_type: MetricValueType,
    ) -> Result<MetricHandle> {
        self.definitions
            .define_metric(name, description, unit, value_type)
    }

    /// Defines a region parameter.
    pub fn define_parameter(
        &self,
        name: &str,
        parameter_type: ParameterType,
    ) -> Result<ParameterHandle> {
        self.definitions.define_parameter(name, parameter_type)
    }

    /// Defines an event attribute.
    pub fn define_attribute(
        &self,
        name: &str,
        description: &str,
        attribute_type: AttributeType,
    ) -> Result<AttributeHandle> {
        self.definitions
            .define_attribute(name, description, attribute_type)
    }

    // =====================================================================
    // Regions
    // =====================================================================

    /// Enters `region` on the calling thread's location.
    pub fn enter_region(&self, region: RegionHandle) -> Result<()> {
        self.ensure_running()?;
        self.with_recorder(None, |location, recorder| {
            self.enter_in(location, recorder, region)
        })
    }

    /// Leaves `region` on the calling thread's location.
    pub fn exit_region(&self, region: RegionHandle) -> Result<()> {
        self.ensure_running()?;
        self.with_recorder(None, |location, recorder| {
            self.exit_in(location, recorder, region)
        })
    }

    /// Enters `region` on `location`.
    ///
    /// Filtered regions are pushed on the stack but produce no event. If the
    /// enter event cannot be recorded the stack is left unchanged.
    pub fn enter_on(&self, location: &Location, region: RegionHandle) -> Result<()> {
        self.ensure_running()?;
        self.with_recorder(Some(location), |location, recorder| {
            self.enter_in(location, recorder, region)
        })
    }

    /// Leaves the innermost region of `location`, which should be `region`.
    ///
    /// Exiting an empty stack is an error. If the innermost region is not
    /// `region`, a mismatch warning is logged and the innermost region is
    /// left, keeping the trace balanced.
    pub fn exit_on(&self, location: &Location, region: RegionHandle) -> Result<()> {
        self.ensure_running()?;
        self.with_recorder(Some(location), |location, recorder| {
            self.exit_in(location, recorder, region)
        })
    }

    fn enter_in(
        &self,
        location: &Location,
        recorder: &mut Recorder,
        region: RegionHandle,
    ) -> Result<()> {
        if !region.is_filtered() {
            self.record_in(location, recorder, TraceEvent::Enter { region })?;
        }
        recorder.stack.enter(region);
        Ok(())
    }

    fn exit_in(
        &self,
        location: &Location,
        recorder: &mut Recorder,
        region: RegionHandle,
    ) -> Result<()> {
        let popped = recorder.stack.exit().ok_or_else(|| {
            Error::new(ErrorKind::StackUnderflow)
                .with_message(format!("exit of {region} on an empty stack"))
                .with_context(location.error_context())
        })?;
        if popped != region {
            Error::new(ErrorKind::RegionMismatch)
                .with_message(format!("exit of {region} while {popped} is innermost"))
                .with_context(location.error_context())
                .report();
        }
        if popped.is_filtered() {
            return Ok(());
        }
        self.record_in(location, recorder, TraceEvent::Leave { region: popped })
    }

    /// Leaves every open region of `location`'s current task, innermost
    /// first, recording one leave event per unfiltered region. Returns the
    /// regions left.
    pub fn exit_all_on(&self, location: &Location) -> Result<Vec<RegionHandle>> {
        self.with_recorder(Some(location), |location, recorder| {
            let regions = recorder.stack.exit_all();
            for &region in &regions {
                self.record_in(location, recorder, TraceEvent::Leave { region })?;
            }
            Ok(regions)
        })
    }

    /// Open regions on the calling thread's location.
    pub fn stack_depth(&self) -> Result<usize> {
        self.with_recorder(None, |_, recorder| Ok(recorder.stack.depth()))
    }

    // =====================================================================
    // Metrics and parameters
    // =====================================================================

    fn trigger(&self, event: TraceEvent) -> Result<()> {
        self.ensure_running()?;
        self.with_recorder(None, |location, recorder| {
            self.record_in(location, recorder, event)
        })
    }

    /// Records a signed counter sample.
    pub fn trigger_counter_i64(&self, metric: MetricHandle, value: i64) -> Result<()> {
        self.trigger(TraceEvent::Metric {
            metric,
            value: MetricValue::Int64(value),
        })
    }

    /// Records an unsigned counter sample.
    pub fn trigger_counter_u64(&self, metric: MetricHandle, value: u64) -> Result<()> {
        self.trigger(TraceEvent::Metric {
            metric,
            value: MetricValue::Uint64(value),
        })
    }

    /// Records a floating-point counter sample.
    pub fn trigger_counter_f64(&self, metric: MetricHandle, value: f64) -> Result<()> {
        self.trigger(TraceEvent::Metric {
            metric,
            value: MetricValue::Double(value),
        })
    }

    /// Records a signed parameter value.
    pub fn trigger_parameter_i64(&self, parameter: ParameterHandle, value: i64) -> Result<()> {
        self.trigger(TraceEvent::ParameterInt { parameter, value })
    }

    /// Records an unsigned parameter value.
    pub fn trigger_parameter_u64(&self, parameter: ParameterHandle, value: u64) -> Result<()> {
        self.trigger(TraceEvent::ParameterUint { parameter, value })
    }

    /// Records a string parameter value; the string is interned.
    pub fn trigger_parameter_string(&self, parameter: ParameterHandle, value: &str) -> Result<()> {
        let value = self.definitions.new_string(value)?;
        self.trigger(TraceEvent::ParameterString { parameter, value })
    }

    // =====================================================================
    // Attributes
    // =====================================================================

    /// Attaches an attribute to the next event of the calling thread's
    /// location.
    pub fn add_attribute(&self, attribute: AttributeHandle, value: AttributeValue) -> Result<()> {
        self.with_recorder(None, |_, recorder| {
            queue_attribute(recorder, attribute, value);
            Ok(())
        })
    }

    /// Attaches an attribute to the next event of `location`. Without
    /// tracing the attribute is discarded.
    pub fn add_attribute_on(
        &self,
        location: &Location,
        attribute: AttributeHandle,
        value: AttributeValue,
    ) -> Result<()> {
        self.with_recorder(Some(location), |_, recorder| {
            queue_attribute(recorder, attribute, value);
            Ok(())
        })
    }
}

fn queue_attribute(recorder: &mut Recorder, attribute: AttributeHandle, value: AttributeValue) {
    if let Some(trace) = recorder.trace.as_mut() {
        trace.pending.push(Attribute { attribute, value });
    }
}
