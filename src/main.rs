// qlisp: featherweight quoted-expression lisp.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::env::args;
use std::io::{stdin, stdout, BufRead, Write};

use qlisp::config;
use qlisp::config::Tunables;
use qlisp::Interp;

fn main() {
    let tunables = match args().nth(1) {
        Some(path) => config::load(path).expect("couldn't load tunables"),
        None => Tunables::default(),
    };
    let trace_gc = tunables.trace_gc;

    let mut interp = Interp::with_tunables(tunables).expect("couldn't allocate interpreter");
    let input = stdin();

    loop {
        print!("> ");
        stdout().flush().expect("couldn't flush stdout");

        let mut line = String::new();
        let read = input
            .lock()
            .read_line(&mut line)
            .expect("couldn't read stdin");
        if read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match interp.read(&line) {
            Ok(frame) => match interp.eval(frame) {
                Ok(()) => {
                    for i in 0..interp.stack_size(frame) {
                        let v = interp.stack_get(frame, i).expect("result index in range");
                        println!("{}", interp.render(Some(v)));
                    }
                }
                Err(e) => println!("error: {}", interp.error_message(e)),
            },
            Err(e) => println!("error: {}", interp.error_message(e)),
        }

        match interp.gc() {
            Ok(swept) => {
                if trace_gc {
                    println!("gc: {}", swept);
                }
            }
            Err(e) => println!("error: {}", interp.error_message(e)),
        }
    }
}
