//! Action dispatch onto the device contracts.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    context::ExecutionContext,
    device::DeviceError,
    failure::StepFailure,
    step::{Action, AxisCommand, Command, CylinderCommand, EngineCommand, MaterialCommand, SensorCommand, Step},
};

pub(super) async fn dispatch(step: &Step, action: &Action, ctx: &ExecutionContext) -> Result<Value, StepFailure> {
    let device = action.device.as_str();
    debug!(step = %step.name(), device = %device, command = action.command.label(), "dispatching");
    let result = match &action.command {
        Command::Axis(command) => axis(device, command, ctx).await,
        Command::Cylinder(command) => cylinder(device, command, ctx).await,
        Command::Sensor(command) => sensor(device, command, ctx).await,
        Command::Material(command) => material(device, command, ctx),
        Command::Engine(command) => return engine(step, command, ctx).await,
    };
    result.map_err(|error| {
        if !error.is_cancelled() {
            warn!(step = %step.name(), device = %device, "{error}");
        }
        StepFailure::from_device(step, error)
    })
}

async fn axis(name: &str, command: &AxisCommand, ctx: &ExecutionContext) -> Result<Value, DeviceError> {
    let axis = ctx.devices().axis(name)?;
    match command {
        AxisCommand::MoveTo { position } => {
            // Motion outlives this step; only the run's cancellation halts it.
            axis.move_to(*position, ctx.run_cancellation()).await?;
            Ok(Value::Null)
        }
        AxisCommand::MoveToAndWait { position } => {
            let reached = axis.move_to_and_wait(*position, ctx.cancellation()).await?;
            Ok(json!(reached))
        }
        AxisCommand::MoveUntil { limit, sensor, threshold } => {
            let sensor = ctx.devices().sensor(sensor)?;
            let stopped_at = axis.move_until(*limit, sensor, *threshold, ctx.cancellation()).await?;
            Ok(json!(stopped_at))
        }
        AxisCommand::ReadPosition => Ok(json!(axis.state().position)),
        AxisCommand::Stop => {
            axis.stop();
            Ok(Value::Null)
        }
    }
}

async fn cylinder(name: &str, command: &CylinderCommand, ctx: &ExecutionContext) -> Result<Value, DeviceError> {
    let cylinder = ctx.devices().cylinder(name)?;
    match command {
        CylinderCommand::Fire { extend } => cylinder.fire(*extend, ctx.run_cancellation()).await?,
        CylinderCommand::FireAndWait { extend } => cylinder.fire_and_wait(*extend, ctx.cancellation()).await?,
        CylinderCommand::WaitFor { extended } => cylinder.wait_for(*extended, ctx.cancellation()).await?,
    }
    Ok(Value::Null)
}

async fn sensor(name: &str, command: &SensorCommand, ctx: &ExecutionContext) -> Result<Value, DeviceError> {
    let sensor = ctx.devices().sensor(name)?;
    match command {
        SensorCommand::CheckLevel { expected } => Ok(Value::Bool(sensor.check_level(*expected).await?)),
        SensorCommand::ReadAnalog => Ok(json!(sensor.read_analog().await?)),
    }
}

fn material(name: &str, command: &MaterialCommand, ctx: &ExecutionContext) -> Result<Value, DeviceError> {
    let table = ctx.devices().workpiece_table(name)?;
    let workpiece = match command {
        MaterialCommand::Spawn { station, class } => table.spawn(station, class),
        MaterialCommand::Transform { station, class } => table.transform(station, class),
        MaterialCommand::Consume { station } => table.consume(station),
        MaterialCommand::Attach { station, carrier } => table.attach(station, carrier),
        MaterialCommand::Detach { carrier, station } => table.detach(carrier, station),
        MaterialCommand::Bind { station, into } => table.bind(station, into),
        MaterialCommand::Unbind { station, to } => table.unbind(station, to),
        MaterialCommand::CheckState { station, class } => {
            return Ok(Value::Bool(table.check_state(station, class.as_deref())));
        }
    }
    .map_err(|error| DeviceError::fault(name, error.to_string()))?;
    serde_json::to_value(workpiece).map_err(|error| DeviceError::fault(name, error.to_string()))
}

async fn engine(step: &Step, command: &EngineCommand, ctx: &ExecutionContext) -> Result<Value, StepFailure> {
    match command {
        EngineCommand::SetVariable { key, value } => {
            ctx.variables().set(key.clone(), value.clone());
            Ok(value.clone())
        }
        EngineCommand::GetVariable { key } => Ok(ctx.variables().get(key).unwrap_or(Value::Null)),
        EngineCommand::Dwell { duration } => {
            tokio::select! {
                _ = tokio::time::sleep(*duration) => Ok(Value::Null),
                _ = ctx.cancellation().cancelled() => Err(StepFailure::cancelled(step)),
            }
        }
    }
}
