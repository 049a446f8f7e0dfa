mod packet;
mod scenario_spec;
mod sim_time;
mod tcp_stack;
