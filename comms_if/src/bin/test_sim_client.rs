//! Simple simulator stand-in
//!
//! Connects to the bridge, sends a number of telemetry frames along a straight road and prints
//! each reply.

use comms_if::{
    net::{connect, SimLink},
    sim::EVENT_TAG
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "test_sim_client")]
struct Opt {
    /// Websocket URL of the bridge
    #[structopt(default_value = "ws://127.0.0.1:4567")]
    url: String,

    /// Number of telemetry frames to send
    #[structopt(short, long, default_value = "5")]
    count: usize,

    /// Send a manual driving frame before the telemetry
    #[structopt(long)]
    manual: bool
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let mut link = connect(&opt.url)?;

    println!("Connected to {}", opt.url);

    if opt.manual {
        link.send_text(&format!("{}[\"telemetry\",null]", EVENT_TAG))?;
        println!("Manual reply: {:?}", link.recv_text()?);
    }

    for i in 0..opt.count {
        // Vehicle creeping along the x axis with the road ahead of it
        let x = i as f64;
        let frame = format!(
            "{}[\"telemetry\",{{\"ptsx\":[{},{},{},{},{},{}],\"ptsy\":[0.0,0.5,1.2,2.0,3.1,4.4],\
             \"x\":{},\"y\":0.0,\"psi\":0.0,\"speed\":10.0}}]",
            EVENT_TAG,
            x + 5.0, x + 15.0, x + 25.0, x + 35.0, x + 45.0, x + 55.0,
            x
        );

        link.send_text(&frame)?;

        match link.recv_text()? {
            Some(r) => println!("Reply {}: {}", i, r),
            None => println!("Reply {}: non-text frame", i)
        }
    }

    link.close();

    Ok(())
}
