mod control_flow;
mod provision_flow;
